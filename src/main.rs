//! # Strandview Application Entry Point
//!
//! Renders a hair scene bundle given as the first command line argument
//! (default: `scenes/ponytail.json`). All setup, event handling and
//! rendering is managed by the `app` module.

fn main() {
    strandview::app::run();
}
