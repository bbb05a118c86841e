use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::sync::Arc;
use strum::Display;
use tracing::{debug, error, info};

use super::balance::region_balances;
use super::demand::reconcile_demand;
use super::netting::net_flows;
use super::shaping::shape_flow_records;
use super::validation::FlowValidator;
use super::FlowError;
use crate::domain::{IntervalRange, Network};
use crate::loader::{LoaderError, TelemetryLoader};
use crate::repo::FlowRecordStore;
use crate::solver::{SolverAdapter, SolverInput};

/// Stages of one interval run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    Loading,
    Netting,
    Reconciling,
    Solving,
    Shaping,
    Validating,
    Persisting,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// Telemetry was missing for the range. Nothing was written.
    Skipped { stage: PipelineStage, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub range: IntervalRange,
    #[serde(flatten)]
    pub outcome: RunOutcome,
    pub records_written: usize,
}

impl RunReport {
    fn skipped(range: IntervalRange, stage: PipelineStage, reason: String) -> Self {
        Self {
            range,
            outcome: RunOutcome::Skipped { stage, reason },
            records_written: 0,
        }
    }
}

/// Anything that can process a closed interval range, returning records written
#[async_trait]
pub trait IntervalProcessor: Send + Sync {
    async fn process_range(&self, range: IntervalRange, validate: bool)
        -> Result<usize, FlowError>;
}

/// Runs the flows pipeline for one interval or a closed interval range
pub struct IntervalRunner {
    network: Network,
    loader: Arc<dyn TelemetryLoader>,
    solver: SolverAdapter,
    validator: FlowValidator,
    store: Arc<dyn FlowRecordStore>,
}

impl IntervalRunner {
    pub fn new(
        network: Network,
        loader: Arc<dyn TelemetryLoader>,
        solver: SolverAdapter,
        validator: FlowValidator,
        store: Arc<dyn FlowRecordStore>,
    ) -> Self {
        Self {
            network,
            loader,
            solver,
            validator,
            store,
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Process `[start, end]`, or the single interval `start` when `end` is omitted.
    ///
    /// Bounds given in the wrong order are swapped. Missing telemetry yields `Ok(0)`.
    pub async fn run_interval(
        &self,
        start: DateTime<FixedOffset>,
        end: Option<DateTime<FixedOffset>>,
        validate: bool,
    ) -> Result<usize, FlowError> {
        let range = IntervalRange::from_optional_end(start, end);
        Ok(self.execute(range, validate).await?.records_written)
    }

    pub async fn execute(
        &self,
        range: IntervalRange,
        validate: bool,
    ) -> Result<RunReport, FlowError> {
        let network = &self.network;
        let range = IntervalRange::new(range.start, range.end);
        self.enter(PipelineStage::Loading, &range);

        let generation = match self
            .loader
            .load_region_energy_emissions(network, &range)
            .await
        {
            Ok(rows) => rows,
            Err(e) => return Ok(self.skip(range, PipelineStage::Loading, e)),
        };

        let readings = match self.loader.load_interconnector_flows(network, &range).await {
            Ok(rows) => rows,
            Err(e) => return Ok(self.skip(range, PipelineStage::Loading, e)),
        };

        self.enter(PipelineStage::Netting, &range);
        let netted = net_flows(&readings);
        if netted.is_empty() {
            let reason = LoaderError::no_data("netted flow", network, &range);
            return Ok(self.skip(range, PipelineStage::Netting, reason));
        }
        let balances = region_balances(network, &netted)?;

        self.enter(PipelineStage::Reconciling, &range);
        let demand = reconcile_demand(network, &generation, &balances);

        self.enter(PipelineStage::Solving, &range);
        let input = SolverInput::from_pipeline(network, &netted, &demand)?;
        let result = self.solver.allocate(&input)?;

        self.enter(PipelineStage::Shaping, &range);
        let records = shape_flow_records(network, &input.interconnectors, &result);

        self.enter(PipelineStage::Validating, &range);
        self.validator.validate(&records, validate)?;

        self.enter(PipelineStage::Persisting, &range);
        let written = self.store.upsert_flow_records(&records).await?;

        self.enter(PipelineStage::Done, &range);
        info!(
            network = %network.code,
            interval_start = %range.start,
            interval_end = %range.end,
            records = written,
            solver = self.solver.solver_name(),
            "inserted network flow records"
        );

        Ok(RunReport {
            range,
            outcome: RunOutcome::Completed,
            records_written: written,
        })
    }

    fn enter(&self, stage: PipelineStage, range: &IntervalRange) {
        debug!(
            network = %self.network.code,
            interval_start = %range.start,
            interval_end = %range.end,
            %stage,
            "flows pipeline stage"
        );
    }

    fn skip(&self, range: IntervalRange, stage: PipelineStage, reason: LoaderError) -> RunReport {
        error!(
            network = %self.network.code,
            interval_start = %range.start,
            interval_end = %range.end,
            %stage,
            error = %reason,
            "skipping flows run"
        );
        RunReport::skipped(range, stage, reason.to_string())
    }
}

#[async_trait]
impl IntervalProcessor for IntervalRunner {
    async fn process_range(
        &self,
        range: IntervalRange,
        validate: bool,
    ) -> Result<usize, FlowError> {
        Ok(self.execute(range, validate).await?.records_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InterconnectorReading, RegionEnergyEmissions, RegionFlow};
    use crate::loader::MockTelemetryLoader;
    use crate::repo::{MemoryFlowStore, MockFlowRecordStore};
    use crate::solver::ProportionalSharingSolver;
    use chrono::TimeZone;

    fn nem() -> Network {
        Network::new("NEM", FixedOffset::east_opt(10 * 3600).unwrap(), 5)
    }

    fn at(minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(10 * 3600)
            .unwrap()
            .with_ymd_and_hms(2023, 4, 9, 10, minute, 0)
            .unwrap()
    }

    fn generation(minute: u32) -> Vec<RegionEnergyEmissions> {
        vec![
            RegionEnergyEmissions::new(at(minute), "NEM", "QLD1", 500.0, 400.0, 12.0),
            RegionEnergyEmissions::new(at(minute), "NEM", "NSW1", 600.0, 420.0, 12.0),
        ]
    }

    fn readings(minute: u32, energy: f64) -> Vec<InterconnectorReading> {
        vec![InterconnectorReading::new(
            at(minute),
            RegionFlow::new("QLD1", "NSW1"),
            energy * 12.0,
            energy,
        )]
    }

    fn loader_with(
        generation: Vec<RegionEnergyEmissions>,
        readings: Vec<InterconnectorReading>,
    ) -> MockTelemetryLoader {
        let mut loader = MockTelemetryLoader::new();
        loader
            .expect_load_region_energy_emissions()
            .returning(move |_, _| Ok(generation.clone()));
        loader
            .expect_load_interconnector_flows()
            .returning(move |_, _| Ok(readings.clone()));
        loader
    }

    fn runner(loader: MockTelemetryLoader, store: Arc<dyn FlowRecordStore>) -> IntervalRunner {
        IntervalRunner::new(
            nem(),
            Arc::new(loader),
            SolverAdapter::new(Arc::new(ProportionalSharingSolver)),
            FlowValidator::default(),
            store,
        )
    }

    #[tokio::test]
    async fn test_single_interval_writes_both_regions() {
        let store = Arc::new(MemoryFlowStore::new());
        let runner = runner(loader_with(generation(15), readings(15, 50.0)), store.clone());

        let written = runner.run_interval(at(15), None, true).await.unwrap();

        assert_eq!(written, 2);
        let records = store.records();
        let qld = records.iter().find(|r| r.network_region == "QLD1").unwrap();
        let nsw = records.iter().find(|r| r.network_region == "NSW1").unwrap();
        assert_eq!(qld.energy_exports, 50.0);
        assert_eq!(nsw.energy_imports, 50.0);
        assert!((nsw.emissions_imports - 40.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_generation_is_a_soft_failure() {
        let mut loader = MockTelemetryLoader::new();
        loader
            .expect_load_region_energy_emissions()
            .returning(|network, range| Err(LoaderError::no_data("region energy", network, range)));
        loader.expect_load_interconnector_flows().never();

        let store = Arc::new(MemoryFlowStore::new());
        let report = runner(loader, store.clone())
            .execute(IntervalRange::single(at(15)), true)
            .await
            .unwrap();

        assert_eq!(report.records_written, 0);
        assert!(matches!(
            report.outcome,
            RunOutcome::Skipped {
                stage: PipelineStage::Loading,
                ..
            }
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_flows_is_a_soft_failure() {
        let mut loader = MockTelemetryLoader::new();
        loader
            .expect_load_region_energy_emissions()
            .returning(|_, _| Ok(generation(15)));
        loader
            .expect_load_interconnector_flows()
            .returning(|network, range| {
                Err(LoaderError::no_data("interconnector flow", network, range))
            });

        let written = runner(loader, Arc::new(MemoryFlowStore::new()))
            .run_interval(at(15), None, true)
            .await
            .unwrap();
        assert_eq!(written, 0);
    }

    #[tokio::test]
    async fn test_validation_failure_is_raised_and_nothing_persisted() {
        // exporting region dirtier than the 1.7 t/MWh ceiling
        let dirty = vec![
            RegionEnergyEmissions::new(at(15), "NEM", "QLD1", 100.0, 200.0, 12.0),
            RegionEnergyEmissions::new(at(15), "NEM", "NSW1", 100.0, 50.0, 12.0),
        ];
        let mut store = MockFlowRecordStore::new();
        store.expect_upsert_flow_records().never();

        let err = runner(loader_with(dirty, readings(15, 10.0)), Arc::new(store))
            .run_interval(at(15), None, true)
            .await
            .unwrap_err();

        assert!(matches!(err, FlowError::Validation(_)));
        assert_eq!(err.stage(), Some(PipelineStage::Validating));
    }

    #[tokio::test]
    async fn test_disabled_validation_persists_anyway() {
        let dirty = vec![
            RegionEnergyEmissions::new(at(15), "NEM", "QLD1", 100.0, 200.0, 12.0),
            RegionEnergyEmissions::new(at(15), "NEM", "NSW1", 100.0, 50.0, 12.0),
        ];
        let store = Arc::new(MemoryFlowStore::new());

        let written = runner(loader_with(dirty, readings(15, 10.0)), store.clone())
            .run_interval(at(15), None, false)
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_persist_failure_is_raised() {
        let mut store = MockFlowRecordStore::new();
        store
            .expect_upsert_flow_records()
            .times(1)
            .returning(|_| Err(crate::repo::PersistError::Unavailable("down".into())));

        let err = runner(loader_with(generation(15), readings(15, 50.0)), Arc::new(store))
            .run_interval(at(15), None, true)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(PipelineStage::Persisting));
    }

    #[tokio::test]
    async fn test_inverted_range_is_normalized() {
        let mut loader = MockTelemetryLoader::new();
        loader
            .expect_load_region_energy_emissions()
            .withf(|_, range| range.start == at(15) && range.end == at(20))
            .returning(|_, _| {
                let mut rows = generation(15);
                rows.extend(generation(20));
                Ok(rows)
            });
        loader
            .expect_load_interconnector_flows()
            .withf(|_, range| range.start <= range.end)
            .returning(|_, _| {
                let mut rows = readings(15, 50.0);
                rows.extend(readings(20, 40.0));
                Ok(rows)
            });

        let written = runner(loader, Arc::new(MemoryFlowStore::new()))
            .run_interval(at(20), Some(at(15)), true)
            .await
            .unwrap();
        assert_eq!(written, 4);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(PipelineStage::Loading.to_string(), "LOADING");
        assert_eq!(PipelineStage::Done.to_string(), "DONE");
    }
}
