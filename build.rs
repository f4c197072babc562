fn main() {
    // The core library builds without a desktop toolkit; only the Tauri shell
    // needs the generated context.
    #[cfg(feature = "desktop")]
    {
        tauri_build::build();
    }
}
