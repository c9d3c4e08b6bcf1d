#![forbid(unsafe_code)]

/// `embed_migrations!` cannot track files it reads, so the crate is rebuilt
/// whenever the migration directory changes.
fn main() {
    println!("cargo:rerun-if-changed=./migrations");
}
