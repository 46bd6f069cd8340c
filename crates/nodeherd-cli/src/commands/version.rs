//! Prints the runner version and the platform it was built for.

pub fn run() {
    println!("nodeherd {}", env!("CARGO_PKG_VERSION"));
    println!(
        "platform: {}-{}",
        std::env::consts::ARCH,
        std::env::consts::OS
    );
}
