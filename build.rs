// Rebuild when the bundled default configuration changes.

fn main() {
    println!("cargo:rerun-if-changed=config.example.toml");
}
