use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, trace_span};

use crate::{
    bios::BiosArbiter,
    config::ServiceConfig,
    ec::{EcLayout, SharedIo},
    fan_curve::{
        FanCurve, hysteresis_curve::HysteresisCurve,
        linear_curve::{CurveError, LinearCurve},
    },
    fans::FanActuator,
    temperature::{SmoothingFilter, TemperatureSampler},
};

#[derive(Debug, Error, PartialEq)]
pub enum FanManagerError {
    #[error(transparent)]
    Curve(#[from] CurveError),
    #[error("Poll interval of {0} seconds can't be used as a duration")]
    InvalidPollInterval(f64),
}

// Outcome of one control loop iteration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub raw_temp: u8,
    pub temp: f64,
    pub speed: f64,
    // Fan units written this tick, None if the speed was unchanged
    pub written: Option<(u8, u8)>,
}

// Runs the sample -> curve -> fans control loop
pub struct FanManager {
    sampler: TemperatureSampler,
    // None when smoothing is disabled in the configuration
    smoothing: Option<SmoothingFilter>,
    curve: HysteresisCurve<LinearCurve>,
    actuator: FanActuator,
    arbiter: BiosArbiter,

    poll_interval: Duration,

    // Last speed written to the fan registers
    last_written: Option<f64>,
}

impl FanManager {
    pub fn new(
        io: SharedIo,
        layout: &EcLayout,
        config: &ServiceConfig,
    ) -> Result<Self, FanManagerError> {
        let poll_interval = Duration::try_from_secs_f64(config.poll_interval)
            .map_err(|_| FanManagerError::InvalidPollInterval(config.poll_interval))?;

        let curve = HysteresisCurve::from_curve(
            LinearCurve::from_config(config)?,
            config.hysteresis as f64,
        );

        let smoothing = config
            .temperature_smoothing
            .then(SmoothingFilter::default);

        Ok(Self {
            sampler: TemperatureSampler::new(io.clone(), layout),
            smoothing,
            curve,
            actuator: FanActuator::new(io.clone(), layout),
            arbiter: BiosArbiter::new(io, layout),

            poll_interval,

            last_written: None,
        })
    }

    pub fn with_arbiter(mut self, arbiter: BiosArbiter) -> Self {
        self.arbiter = arbiter;
        self
    }

    // Run the control loop until the token is cancelled.
    // A cancellation is only observed between two iterations,
    // register write sequences are never cut in half
    pub async fn run(&mut self, run_token: CancellationToken) {
        info!(
            "Fan manager: Running, polling every {:?}",
            self.poll_interval
        );

        loop {
            if run_token.is_cancelled() {
                break;
            }

            // Keep cooling whatever happens, errors only skip this tick
            if let Err(err) = self.update().await {
                for e in err.chain() {
                    error!("{e}");
                }
            }

            select! {
                _ = run_token.cancelled() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }

        info!("Fan manager: Quiting");
    }

    // Execute a single control loop iteration
    pub async fn update(&mut self) -> Result<TickReport> {
        let report = self.drive_fans()?;

        self.arbiter
            .take_ownership()
            .await
            .with_context(|| "Failed to disable BIOS fan control")?;

        Ok(report)
    }

    // Sample, filter and apply the curve, writing the fans if needed
    fn drive_fans(&mut self) -> Result<TickReport> {
        let _guard = trace_span!("updating").entered();

        let raw_temp = self
            .sampler
            .sample_temperature()
            .with_context(|| "Failed to read EC temperature")?;

        let temp = match self.smoothing.as_mut() {
            Some(filter) => filter.push(raw_temp as f64),
            None => raw_temp as f64,
        };

        let speed = self.curve.get_speed(temp);

        // Only touch the fan registers when the speed changed
        let written = if self.last_written != Some(speed) {
            let units = self
                .actuator
                .set_fan_speeds(speed, speed)
                .with_context(|| format!("Failed to set fan speed to {speed:.2}%"))?;
            self.last_written = Some(speed);

            Some(units)
        } else {
            None
        };

        trace!(
            "temp: {raw_temp}°C (smoothed {temp:.1}°C) - speed: {speed:.2}% - written: {written:?}"
        );

        Ok(TickReport {
            raw_temp,
            temp,
            speed,
            written,
        })
    }

    // Hand the fans back to the BIOS before quitting
    pub fn cleanup(&mut self) -> Result<()> {
        self.arbiter
            .release_ownership()
            .with_context(|| "Failed to restore BIOS fan control")
    }

    // Target speed for a temperature, bypassing the hysteresis state
    pub fn compute_target_speed(&self, temp: f64) -> f64 {
        self.curve.inner().compute_target_speed(temp)
    }

    pub fn last_written(&self) -> Option<f64> {
        self.last_written
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn arbiter(&self) -> &BiosArbiter {
        &self.arbiter
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        bios::Ownership,
        ec::{RegisterError, testing::MemoryEc},
    };

    fn manager(smoothing: bool) -> (Arc<MemoryEc>, FanManager, EcLayout) {
        let layout = EcLayout::default();
        let ec = Arc::new(MemoryEc::new());

        let config = ServiceConfig {
            temperature_smoothing: smoothing,
            poll_interval: 0.01,
            ..ServiceConfig::default()
        };

        let arbiter = BiosArbiter::new(ec.clone(), &layout)
            .with_settle_delay(Duration::from_millis(1));
        let manager = FanManager::new(ec.clone(), &layout, &config)
            .unwrap()
            .with_arbiter(arbiter);

        (ec, manager, layout)
    }

    fn set_temps(ec: &MemoryEc, layout: &EcLayout, cpu: u8, gpu: u8) {
        ec.set(layout.cpu_temp_offset, cpu);
        ec.set(layout.gpu_temp_offset, gpu);
    }

    #[tokio::test]
    async fn test_tick_writes_fans_then_takes_ownership() {
        let (ec, mut manager, layout) = manager(false);
        set_temps(&ec, &layout, 65, 40);

        let report = manager.update().await.unwrap();

        assert_eq!(report.raw_temp, 65);
        assert_eq!(report.speed, 50.);
        assert_eq!(report.written, Some((28, 29)));
        assert_eq!(
            ec.writes(),
            vec![
                (layout.fan1_offset, 28),
                (layout.fan2_offset, 29),
                (layout.bios_offset, 6),
                (layout.timer_offset, 0),
            ]
        );
    }

    #[tokio::test]
    async fn test_unchanged_speed_skips_fan_writes() {
        let (ec, mut manager, layout) = manager(false);
        set_temps(&ec, &layout, 65, 40);
        manager.update().await.unwrap();
        ec.clear_writes();

        set_temps(&ec, &layout, 66, 40);
        let report = manager.update().await.unwrap();
        assert_eq!(report.speed, 52.);
        assert!(report.written.is_some());
        ec.clear_writes();

        let report = manager.update().await.unwrap();
        assert_eq!(report.written, None);
        // The BIOS timer is refreshed every tick regardless
        assert_eq!(
            ec.writes(),
            vec![(layout.bios_offset, 6), (layout.timer_offset, 0)]
        );
    }

    #[tokio::test]
    async fn test_hysteresis_holds_small_changes() {
        let (ec, mut manager, layout) = manager(false);

        set_temps(&ec, &layout, 75, 0);
        assert_eq!(manager.update().await.unwrap().speed, 65.);

        // 66% is held
        set_temps(&ec, &layout, 76, 0);
        let report = manager.update().await.unwrap();
        assert_eq!(report.speed, 65.);
        assert_eq!(report.written, None);

        set_temps(&ec, &layout, 77, 0);
        assert_eq!(manager.update().await.unwrap().speed, 67.);

        set_temps(&ec, &layout, 70, 0);
        assert_eq!(manager.update().await.unwrap().speed, 60.);
    }

    #[tokio::test]
    async fn test_smoothing_averages_samples() {
        let (ec, mut manager, layout) = manager(true);

        set_temps(&ec, &layout, 60, 0);
        assert_eq!(manager.update().await.unwrap().temp, 60.);

        set_temps(&ec, &layout, 70, 0);
        let report = manager.update().await.unwrap();
        assert_eq!(report.raw_temp, 70);
        assert_eq!(report.temp, 65.);
        assert_eq!(report.speed, 50.);
    }

    #[tokio::test]
    async fn test_failed_write_is_retried_next_tick() {
        let (ec, mut manager, layout) = manager(false);
        set_temps(&ec, &layout, 93, 0);

        ec.fail_writes(true);
        assert!(manager.update().await.is_err());

        ec.fail_writes(false);
        let report = manager.update().await.unwrap();
        assert_eq!(report.written, Some((55, 57)));
        assert_eq!(ec.get(layout.fan1_offset), 55);
    }

    #[tokio::test]
    async fn test_truncated_write_skips_tick() {
        let (ec, mut manager, layout) = manager(false);
        set_temps(&ec, &layout, 65, 0);
        manager.update().await.unwrap();
        assert_eq!(manager.last_written(), Some(50.));

        set_temps(&ec, &layout, 93, 0);
        ec.truncate_writes(true);
        let err = manager.update().await.unwrap_err();

        assert!(err.chain().any(|e| matches!(
            e.downcast_ref::<RegisterError>(),
            Some(RegisterError::TruncatedWrite { .. })
        )));
        assert_eq!(manager.last_written(), Some(50.));

        ec.truncate_writes(false);
        let report = manager.update().await.unwrap();
        assert_eq!(report.written, Some((55, 57)));
        assert_eq!(manager.last_written(), Some(100.));
    }

    #[test]
    fn test_unusable_poll_interval_is_rejected() {
        let layout = EcLayout::default();
        let ec = Arc::new(MemoryEc::new());

        for poll_interval in [1e20, -1., f64::NAN] {
            let config = ServiceConfig {
                poll_interval,
                ..ServiceConfig::default()
            };

            assert!(matches!(
                FanManager::new(ec.clone(), &layout, &config),
                Err(FanManagerError::InvalidPollInterval(_))
            ));
        }

        let config = ServiceConfig {
            speed_curve: vec![20],
            ..ServiceConfig::default()
        };
        assert!(matches!(
            FanManager::new(ec, &layout, &config),
            Err(FanManagerError::Curve(CurveError::LengthMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (ec, mut manager, layout) = manager(false);
        set_temps(&ec, &layout, 75, 0);

        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            async move {
                sleep(Duration::from_millis(50)).await;
                token.cancel();
            }
        };

        tokio::join!(manager.run(token), canceller);

        assert_eq!(ec.get(layout.fan1_offset), 36);
        assert_eq!(
            manager.arbiter().current_ownership().unwrap(),
            Ownership::DaemonOwned
        );

        manager.cleanup().unwrap();
        assert_eq!(
            manager.arbiter().current_ownership().unwrap(),
            Ownership::FirmwareOwned
        );
        assert_eq!(ec.get(layout.fan1_offset), 0);
    }

    #[test]
    fn test_compute_target_speed_ignores_hysteresis() {
        let (_, manager, _) = manager(false);

        assert_eq!(manager.compute_target_speed(65.), 50.);
        assert_eq!(manager.compute_target_speed(66.), 52.);
        assert_eq!(manager.compute_target_speed(45.), 0.);
    }
}
