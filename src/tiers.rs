//! The static tier table (spec.md §3's `TierLimits`, loaded first per §9's
//! startup order: "load tiers → connect primary backend → ...").
//!
//! spec.md's Environment surface (§6) doesn't name an env var for the tier
//! table itself — it's "static config" rather than one of the three
//! documents the state store owns. This crate resolves it from an optional
//! `tiers.json` file under the configured data directory (the same
//! filesystem-first posture as the state store's file backend), falling
//! back to a built-in three-tier table (`free`/`pro`/`enterprise`) that
//! matches the shapes spec.md's end-to-end scenarios exercise.

use std::collections::HashMap;
use std::path::Path;

use crate::model::TierLimits;

/// Loads `<data_dir>/tiers.json` if present and well-formed; otherwise logs
/// and falls back to [`default_tiers`]. A malformed (but present) file is
/// treated as a startup error, per the "fail fast" posture — an absent file
/// is the expected, supported case.
pub fn load_tiers(data_dir: &Path) -> anyhow::Result<HashMap<String, TierLimits>> {
    let path = data_dir.join("tiers.json");
    match std::fs::read(&path) {
        Ok(bytes) => {
            let tiers: HashMap<String, TierLimits> = serde_json::from_slice(&bytes)
                .map_err(|e| anyhow::anyhow!("{} is present but malformed: {e}", path.display()))?;
            tracing::info!(path = %path.display(), count = tiers.len(), "loaded tier table");
            Ok(tiers)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("no tiers.json found; using built-in default tier table");
            Ok(default_tiers())
        }
        Err(e) => Err(anyhow::anyhow!("reading {}: {e}", path.display())),
    }
}

/// Built-in fallback: `free` (rate-limited, quality window open-bottomed),
/// `pro` (looser limits, prefers mid/high scoring providers), `enterprise`
/// (unlimited rate, highest-scoring providers only).
pub fn default_tiers() -> HashMap<String, TierLimits> {
    let mut tiers = HashMap::new();
    tiers.insert(
        "free".to_string(),
        TierLimits { rps: 1, rpm: 20, rpd: 1000, max_tokens: Some(100_000), min_provider_score: None, max_provider_score: None },
    );
    tiers.insert(
        "pro".to_string(),
        TierLimits { rps: 10, rpm: 300, rpd: 0, max_tokens: Some(5_000_000), min_provider_score: Some(40), max_provider_score: None },
    );
    tiers.insert(
        "enterprise".to_string(),
        TierLimits { rps: 0, rpm: 0, rpd: 0, max_tokens: None, min_provider_score: Some(70), max_provider_score: None },
    );
    tiers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tiers_cover_all_three_names() {
        let tiers = default_tiers();
        assert!(tiers.contains_key("free"));
        assert!(tiers.contains_key("pro"));
        assert!(tiers.contains_key("enterprise"));
    }

    #[test]
    fn load_tiers_falls_back_when_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let tiers = load_tiers(dir.path()).unwrap();
        assert_eq!(tiers.len(), default_tiers().len());
    }

    #[test]
    fn load_tiers_reads_a_present_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut custom = HashMap::new();
        custom.insert("solo".to_string(), TierLimits { rps: 1, rpm: 1, rpd: 1, max_tokens: None, min_provider_score: None, max_provider_score: None });
        std::fs::write(dir.path().join("tiers.json"), serde_json::to_vec(&custom).unwrap()).unwrap();

        let tiers = load_tiers(dir.path()).unwrap();
        assert_eq!(tiers.len(), 1);
        assert!(tiers.contains_key("solo"));
    }

    #[test]
    fn load_tiers_errors_on_malformed_present_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tiers.json"), b"not json").unwrap();
        assert!(load_tiers(dir.path()).is_err());
    }
}
