fn main() {
    // Set linker flags for macOS to help libpdfium.dylib resolution
    #[cfg(target_os = "macos")]
    {
        println!("cargo:rustc-link-arg=-Wl,-rpath,@executable_path/../Frameworks");
    }

    // The Tauri context (tauri.conf.json, icons) is only needed by the desktop shell
    #[cfg(feature = "desktop")]
    tauri_build::build()
}
