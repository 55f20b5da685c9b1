use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ReportError, ReportResult};

/// Canvas geometry in PDF points (1/72 in).
#[derive(Debug, Clone, PartialEq)]
pub struct PageGeometry {
    pub page_width: f32,
    pub page_height: f32,
    pub margin: f32,
    pub roll_width: f32,
    pub name_width: f32,
    pub summary_width: f32,
    pub row_height: f32,
    /// Title band, column header and footer space taken off the page height.
    pub header_reserve: f32,
    pub min_column_width: f32,
    pub min_font_size: f32,
    pub max_rows_per_page: usize,
}

impl Default for PageGeometry {
    fn default() -> Self {
        // A4 landscape.
        Self {
            page_width: 842.0,
            page_height: 595.0,
            margin: 28.0,
            roll_width: 60.0,
            name_width: 130.0,
            summary_width: 70.0,
            row_height: 14.0,
            header_reserve: 130.0,
            min_column_width: 14.0,
            min_font_size: 5.0,
            max_rows_per_page: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportConfig {
    pub geometry: PageGeometry,
    pub render_timeout: Duration,
    /// Rows rendered between cooperative yields.
    pub yield_every: usize,
    pub temp_dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            geometry: PageGeometry::default(),
            render_timeout: Duration::from_secs(300),
            yield_every: 64,
            temp_dir: env::temp_dir(),
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

impl ReportConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(ms) = env_u64("ATTENDD_RENDER_TIMEOUT_MS") {
            cfg.render_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_u64("ATTENDD_MAX_ROWS_PER_PAGE").filter(|n| *n > 0) {
            cfg.geometry.max_rows_per_page = n as usize;
        }
        if let Some(n) = env_u64("ATTENDD_YIELD_EVERY").filter(|n| *n > 0) {
            cfg.yield_every = n as usize;
        }
        if let Ok(dir) = env::var("ATTENDD_TEMP_DIR") {
            if !dir.trim().is_empty() {
                cfg.temp_dir = PathBuf::from(dir);
            }
        }
        cfg
    }

    /// Applies `params.options` on top of this config. Unknown keys are ignored.
    pub fn with_overrides(&self, options: Option<&serde_json::Value>) -> ReportResult<Self> {
        let mut cfg = self.clone();
        let Some(options) = options else {
            return Ok(cfg);
        };
        if options.is_null() {
            return Ok(cfg);
        }
        let Some(obj) = options.as_object() else {
            return Err(ReportError::InvalidRange(
                "options must be an object".to_string(),
            ));
        };

        let positive = |key: &str| -> ReportResult<Option<u64>> {
            match obj.get(key) {
                None => Ok(None),
                Some(v) if v.is_null() => Ok(None),
                Some(v) => match v.as_u64() {
                    Some(n) if n > 0 => Ok(Some(n)),
                    _ => Err(ReportError::InvalidRange(format!(
                        "options.{key} must be a positive integer"
                    ))),
                },
            }
        };

        if let Some(ms) = positive("timeoutMs")? {
            cfg.render_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = positive("maxRowsPerPage")? {
            cfg.geometry.max_rows_per_page = n as usize;
        }
        if let Some(n) = positive("yieldEvery")? {
            cfg.yield_every = n as usize;
        }
        if let Some(n) = positive("rowHeight")? {
            cfg.geometry.row_height = n as f32;
        }
        match obj.get("tempDir") {
            None => {}
            Some(v) if v.is_null() => {}
            Some(v) => {
                let Some(dir) = v.as_str().filter(|s| !s.trim().is_empty()) else {
                    return Err(ReportError::InvalidRange(
                        "options.tempDir must be a non-empty string".to_string(),
                    ));
                };
                cfg.temp_dir = PathBuf::from(dir);
            }
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overrides_replace_only_given_keys() {
        let base = ReportConfig::default();
        let cfg = base
            .with_overrides(Some(&json!({ "timeoutMs": 250, "maxRowsPerPage": 20 })))
            .unwrap();
        assert_eq!(cfg.render_timeout, Duration::from_millis(250));
        assert_eq!(cfg.geometry.max_rows_per_page, 20);
        assert_eq!(cfg.yield_every, base.yield_every);
        assert_eq!(cfg.geometry.row_height, base.geometry.row_height);
    }

    #[test]
    fn bad_override_values_are_rejected() {
        let base = ReportConfig::default();
        assert!(base.with_overrides(Some(&json!({ "timeoutMs": 0 }))).is_err());
        assert!(base.with_overrides(Some(&json!({ "yieldEvery": "x" }))).is_err());
        assert!(base.with_overrides(Some(&json!({ "tempDir": "" }))).is_err());
        assert!(base.with_overrides(Some(&json!([1, 2]))).is_err());
        assert_eq!(base.with_overrides(None).unwrap(), base);
    }
}
