//! Semantic color palette for terminal output.

use owo_colors::{OwoColorize, Style};
use std::fmt::Display;

/// What a piece of output means, independent of how it is drawn.
#[derive(Debug, Clone, Copy)]
enum Tone {
    Success,
    Error,
    Warning,
    Muted,
    Header,
    Code,
}

impl Tone {
    fn style(self) -> Style {
        match self {
            Self::Success => Style::new().green().bold(),
            Self::Error => Style::new().red().bold(),
            Self::Warning => Style::new().yellow(),
            Self::Muted => Style::new().dimmed(),
            Self::Header => Style::new().bold(),
            Self::Code => Style::new().blue(),
        }
    }

    fn paint(self, value: &impl Display) -> String {
        if super::no_color() {
            value.to_string()
        } else {
            value.style(self.style()).to_string()
        }
    }
}

/// Applies the palette to anything printable.
pub trait SemanticStyle: Display + Sized {
    fn success(&self) -> String {
        Tone::Success.paint(self)
    }

    fn error(&self) -> String {
        Tone::Error.paint(self)
    }

    fn warning(&self) -> String {
        Tone::Warning.paint(self)
    }

    fn muted(&self) -> String {
        Tone::Muted.paint(self)
    }

    fn header(&self) -> String {
        Tone::Header.paint(self)
    }

    fn code(&self) -> String {
        Tone::Code.paint(self)
    }
}

impl<T: Display> SemanticStyle for T {}
