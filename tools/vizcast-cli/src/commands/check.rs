//! Check which backends and encoders are usable.

use std::path::Path;

use vizcast_common::config::AppConfig;
use vizcast_synthesis::backend::{BackendFactory, BackendKind, DefaultBackendFactory};

pub async fn run(config: &AppConfig, config_path: &Path) -> anyhow::Result<()> {
    println!("Vizcast System Check");
    println!("{}", "=".repeat(50));

    if config_path.exists() {
        println!("[OK] Config: {}", config_path.display());
    } else {
        println!(
            "[INFO] Config: {} (not found, using defaults)",
            config_path.display()
        );
    }

    let selected = BackendKind::from_selection(&config.backend.selection);
    println!(
        "[OK] Selected backend: {} (\"{}\")",
        selected.label(),
        config.backend.selection
    );

    println!();
    println!("Backends:");
    let factory = DefaultBackendFactory::new();
    let mut usable = 0;
    for kind in [
        BackendKind::OnDeviceLight,
        BackendKind::OnDeviceAccelerated,
        BackendKind::Remote,
    ] {
        let mut backend = factory.build(kind, &config.backend);
        match backend.init().await {
            Ok(()) => {
                usable += 1;
                println!("  [OK]   {}", kind.label());
            }
            Err(e) => println!("  [WARN] {}: {e}", kind.label()),
        }
        backend.close().await;
    }

    println!();
    println!("Recording:");
    for (i, codecs) in vizcast_recorder::codec::available_codecs().iter().enumerate() {
        let marker = if i == 0 { " (default)" } else { "" };
        println!("  [OK]   {codecs}{marker}");
    }
    match vizcast_recorder::select_codecs(&config.recording.encoder) {
        Ok(codecs) => println!(
            "  Configured \"{}\" -> {} (.{})",
            config.recording.encoder,
            codecs.name(),
            codecs.container_extension()
        ),
        Err(e) => println!("  [WARN] Configured \"{}\": {e}", config.recording.encoder),
    }

    println!();
    if usable == 0 {
        println!("No synthesis backend is usable. Check the configuration above.");
    } else if selected != BackendKind::OnDeviceLight && usable == 1 {
        println!("Only the on-device backend is usable; the selected backend will fall back to it.");
    } else {
        println!("Vizcast is ready.");
    }

    Ok(())
}
