//! Background removal HTTP server
//!
//! Serves a drop-box page and turns POSTed images into PNGs with a
//! transparent background, using ONNX Runtime or Tract.

#[cfg(feature = "cli")]
use rmbg_server::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
