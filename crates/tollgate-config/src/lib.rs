// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tollgate configuration: typed model, layered loading and diagnostics.
//!
//! Unknown keys are rejected. Load failures come back as a list of
//! [`ConfigError`]s that [`render_errors`] prints with source spans and
//! "did you mean" hints.
//!
//! ```no_run
//! match tollgate_config::load_and_validate() {
//!     Ok(config) => println!("currency: {}", config.engine.currency),
//!     Err(errors) => tollgate_config::render_errors(&errors),
//! }
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

pub use diagnostic::{render_errors, ConfigError};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::TollgateConfig;

/// Merge the standard file locations and `TOLLGATE_*` variables, then validate.
pub fn load_and_validate() -> Result<TollgateConfig, Vec<ConfigError>> {
    checked(loader::load_config(), collect_toml_sources)
}

/// Load `path` (plus `TOLLGATE_*` variables) and validate.
pub fn load_and_validate_path(path: &std::path::Path) -> Result<TollgateConfig, Vec<ConfigError>> {
    checked(loader::load_config_from_path(path), || {
        std::fs::read_to_string(path)
            .map(|content| vec![(path.display().to_string(), content)])
            .unwrap_or_default()
    })
}

/// Parse and validate an in-memory TOML document.
pub fn load_and_validate_str(toml_content: &str) -> Result<TollgateConfig, Vec<ConfigError>> {
    checked(loader::load_config_from_str(toml_content), || {
        vec![("<inline>".to_string(), toml_content.to_string())]
    })
}

/// Run semantic validation on a loaded config, or turn the figment error
/// into diagnostics against the files `sources` yields.
fn checked(
    loaded: Result<TollgateConfig, figment::Error>,
    sources: impl FnOnce() -> Vec<(String, String)>,
) -> Result<TollgateConfig, Vec<ConfigError>> {
    match loaded {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => Err(diagnostic::figment_to_config_errors(err, &sources())),
    }
}

/// Read whichever config files exist so unknown keys can be pointed at.
fn collect_toml_sources() -> Vec<(String, String)> {
    let mut candidates = vec![std::path::PathBuf::from("/etc/tollgate/tollgate.toml")];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("tollgate/tollgate.toml"));
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("tollgate.toml"));
    }

    candidates
        .into_iter()
        .filter_map(|path| {
            std::fs::read_to_string(&path)
                .ok()
                .map(|content| (path.display().to_string(), content))
        })
        .collect()
}
