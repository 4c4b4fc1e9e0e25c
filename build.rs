fn main() {
    // Shown by `pmkv version`
    let now = chrono::Utc::now();
    println!(
        "cargo:rustc-env=BUILD_DATE={}",
        now.format("%Y-%m-%d %H:%M:%S UTC")
    );

    // Package metadata and git commit for build_info
    built::write_built_file().expect("Failed to acquire build-time information");
}
