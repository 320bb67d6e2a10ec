//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `epistula_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

fn main() {
    println!("epistula_core ping={}", epistula_core::ping());
    println!("epistula_core version={}", epistula_core::core_version());
}
