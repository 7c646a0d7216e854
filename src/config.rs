/// Application-level constants
pub const APP_NAME: &str = "footnote-stitch";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "footnote_stitch=debug,stitch=debug,warn"
    } else {
        "footnote_stitch=info,stitch=info,warn"
    }
}
