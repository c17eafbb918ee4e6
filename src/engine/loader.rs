//! Builds pooled engine instances from the loaded corpus

use super::adapter::AnalogEngine;
use super::transform::SimilarityTransform;
use crate::config::SearchSettings;
use crate::corpus::CorpusStore;
use crate::forecast::Horizon;
use crate::pool::WorkerFactory;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

/// Worker factory for [`AnalogEngine`]s.
///
/// Each engine gets the indices of every horizon that passed calibration.
pub struct EngineFactory {
    store: Arc<CorpusStore>,
    transform: SimilarityTransform,
    horizons: Vec<Horizon>,
}

impl EngineFactory {
    /// Calibrate every loaded index and keep the horizons that pass
    pub fn new(store: Arc<CorpusStore>, settings: &SearchSettings) -> Self {
        let transform =
            SimilarityTransform::new(settings.similarity_offset, settings.similarity_scale);

        let horizons = store
            .horizons()
            .into_iter()
            .filter(|&horizon| {
                let Some(corpus) = store.get(horizon) else {
                    return false;
                };
                if !settings.calibrate {
                    return true;
                }
                match transform.calibrate(
                    corpus.index.as_ref(),
                    settings.calibration_samples,
                    settings.calibration_tolerance,
                ) {
                    Ok(report) => {
                        info!(
                            "Calibrated horizon {}: {} probes, max deviation {:.2e}",
                            horizon, report.samples, report.max_deviation
                        );
                        true
                    }
                    Err(e) => {
                        error!(
                            "Similarity transform does not match index for horizon {}: {}; horizon disabled",
                            horizon, e
                        );
                        false
                    }
                }
            })
            .collect();

        Self {
            store,
            transform,
            horizons,
        }
    }

    /// Horizons the built engines will serve
    pub fn horizons(&self) -> &[Horizon] {
        &self.horizons
    }

    pub fn transform(&self) -> SimilarityTransform {
        self.transform
    }
}

#[async_trait]
impl WorkerFactory<AnalogEngine> for EngineFactory {
    async fn build(&self, slot: usize) -> Result<AnalogEngine> {
        if self.horizons.is_empty() {
            bail!("no usable index for any horizon");
        }

        let mut engine = AnalogEngine::new(slot, self.transform);
        for &horizon in &self.horizons {
            if let Some(corpus) = self.store.get(horizon) {
                engine = engine.with_index(horizon, corpus.index.clone());
            }
        }
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{CorpusLoader, SyntheticCorpusLoader};
    use crate::config::Settings;

    fn store(horizons: &[Horizon]) -> Arc<CorpusStore> {
        let settings = Settings::default();
        let loader = SyntheticCorpusLoader::new(200, 7, settings.synthesis.variables.clone());
        Arc::new(CorpusStore::load(&loader as &dyn CorpusLoader, horizons, 16).unwrap())
    }

    #[tokio::test]
    async fn test_builds_engines_for_calibrated_horizons() {
        let search = SearchSettings {
            dimension: 16,
            ..Default::default()
        };
        let factory = EngineFactory::new(store(&[Horizon::H6, Horizon::H24]), &search);
        assert_eq!(factory.horizons(), &[Horizon::H6, Horizon::H24]);

        let engine = factory.build(3).await.unwrap();
        assert_eq!(engine.id(), 3);
        assert!(engine.has_index(Horizon::H24));
        assert!(!engine.has_index(Horizon::H48));
    }

    #[tokio::test]
    async fn test_miscalibrated_constants_disable_horizons() {
        let search = SearchSettings {
            dimension: 16,
            similarity_offset: 0.0,
            similarity_scale: 1.0,
            ..Default::default()
        };
        let factory = EngineFactory::new(store(&[Horizon::H24]), &search);
        assert!(factory.horizons().is_empty());
        assert!(factory.build(0).await.is_err());
    }
}
