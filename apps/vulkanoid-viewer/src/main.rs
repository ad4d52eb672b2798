//! Vulkanoid Viewer
//!
//! Draws a textured, spinning cube with MSAA, a mip-mapped texture and
//! per-frame uniform buffers. Shaders are loaded as precompiled SPIR-V.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p vulkanoid-viewer -- <vertex.spv> <fragment.spv> [texture]
//! ```
//!
//! The vertex shader reads position, normal and texcoord at locations 0-2 and
//! a `model`/`view`/`proj` uniform block at set 0, binding 0. The fragment
//! shader samples a combined image sampler at set 0, binding 1. Without a
//! texture path a checkerboard is used.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;
mod mesh;

use vulkanoid_app::{run_app, AppConfig};

use crate::app::{Viewer, ViewerParams};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const MSAA_SAMPLES: u32 = 4;

fn main() -> anyhow::Result<()> {
    // Check for help flag before starting the app
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    if let Err(e) = ViewerParams::from_args() {
        eprintln!("error: {e}\n");
        print_help();
        std::process::exit(2);
    }

    run_app::<Viewer>(
        AppConfig::new("Vulkanoid Viewer")
            .with_size(WIDTH, HEIGHT)
            .with_msaa_samples(MSAA_SAMPLES)
            .with_clear_color([0.05, 0.05, 0.08, 1.0]),
    )
}

fn print_help() {
    eprintln!(
        "Vulkanoid Viewer

USAGE:
    vulkanoid-viewer <VERTEX_SPV> <FRAGMENT_SPV> [TEXTURE]

ARGS:
    <VERTEX_SPV>            Vertex shader SPIR-V
    <FRAGMENT_SPV>          Fragment shader SPIR-V
    [TEXTURE]               Image file for the cube (default: checkerboard)

OTHER:
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
