//! Raw wave-parameter sweep orchestration.
//!
//! [`raw_sweep`] runs the full acquisition sequence: connect, back up the
//! instrument state, configure, run N held single sweeps reading the eight
//! wave-parameter traces per sweep, read the frequency axis, restore the
//! instrument, and hand back a [`RawSweep`].
//!
//! Per sweep, the eight traces arrive in the slot order of
//! [`crate::driver::WAVE_TRACES`]; element `(rx, tx)` of the per-frequency
//! matrix is trace `2·rx + tx` (A from slots 1-4, B from slots 5-8).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::driver::{VectorStar, WAVE_TRACES};
use crate::error::VnaError;
use crate::mock::MockVectorStar;
use crate::resource::VisaResource;
use crate::scpi::DEFAULT_TIMEOUT_MS;
use crate::touchstone::{sweep_comment_block, TouchstoneFile};
use crate::twoport::TwoPort;

fn default_sweeps() -> usize {
    1
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Acquisition parameters.
///
/// Optional instrument settings mean "keep whatever the instrument is
/// currently set to"; only explicit values are written.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    /// VISA resource address, e.g. `TCPIP::169.254.63.67::INSTR`.
    #[serde(default)]
    pub address: String,

    /// Number of sweeps to acquire.
    #[serde(default = "default_sweeps")]
    pub sweeps: usize,

    /// IF bandwidth in Hz.
    #[serde(default)]
    pub if_bandwidth: Option<f64>,

    /// Start frequency in Hz.
    #[serde(default)]
    pub freq_start: Option<f64>,

    /// Stop frequency in Hz (must exceed the start when both are given).
    #[serde(default)]
    pub freq_stop: Option<f64>,

    /// Frequency points per sweep (at least 2).
    #[serde(default)]
    pub points: Option<u32>,

    /// Standalone-source power level in dBm (both ports, below 54 GHz).
    #[serde(default)]
    pub power: Option<f64>,

    /// Extender power level in dBm (both ports, above 54 GHz).
    #[serde(default)]
    pub power_extended: Option<f64>,

    /// Response timeout in milliseconds; must cover one full sweep.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Run against the in-process mock instrument instead of hardware.
    #[serde(default)]
    pub mock: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            sweeps: 1,
            if_bandwidth: None,
            freq_start: None,
            freq_stop: None,
            points: None,
            power: None,
            power_extended: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            mock: false,
        }
    }
}

impl SweepConfig {
    /// A single-sweep configuration against the mock instrument.
    pub fn mock() -> Self {
        Self {
            mock: true,
            ..Self::default()
        }
    }

    /// Load from a TOML file.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), VnaError> {
        if self.sweeps == 0 {
            return Err(VnaError::Config("sweeps must be at least 1".to_string()));
        }
        if let Some(n) = self.points {
            if n < 2 {
                return Err(VnaError::Config(format!(
                    "points must be at least 2, got {n}"
                )));
            }
        }
        if let (Some(start), Some(stop)) = (self.freq_start, self.freq_stop) {
            if stop <= start {
                return Err(VnaError::Config(format!(
                    "stop frequency {stop} Hz must be above start frequency {start} Hz"
                )));
            }
        }
        if !self.mock && self.address.is_empty() {
            return Err(VnaError::Config(
                "address is required unless mock mode is set".to_string(),
            ));
        }
        Ok(())
    }
}

/// As-applied sweep settings, read back from the instrument.
///
/// Serde names match the comment keys the Touchstone header carries.
#[derive(Debug, Clone, Serialize)]
pub struct SweepSettings {
    #[serde(rename = "Power level port1 (standard) [dBm]")]
    pub power_port1_dbm: f64,
    #[serde(rename = "Power level port2 (standard) [dBm]")]
    pub power_port2_dbm: f64,
    #[serde(rename = "Power level port1 (extended >54GHz) [dBm]")]
    pub power_ext_port1_dbm: f64,
    #[serde(rename = "Power level port2 (extended >54GHz) [dBm]")]
    pub power_ext_port2_dbm: f64,
    #[serde(rename = "IF bandwidth [Hz]")]
    pub if_bandwidth_hz: f64,
    #[serde(rename = "Start frequency [Hz]")]
    pub freq_start_hz: f64,
    #[serde(rename = "Stop frequency [Hz]")]
    pub freq_stop_hz: f64,
    #[serde(rename = "Sweep points")]
    pub sweep_points: u32,
}

/// When one sweep started and how long it took.
#[derive(Debug, Clone, Serialize)]
pub struct SweepTiming {
    #[serde(rename = "Timestamp (sweep start)")]
    pub started: DateTime<Utc>,
    #[serde(rename = "Sweep duration [sec]")]
    pub duration_s: f64,
}

/// Result of a raw acquisition: frequency axis, per-sweep wave matrices,
/// per-sweep timing, and the settings the instrument actually used.
#[derive(Debug, Clone)]
pub struct RawSweep {
    /// Frequency axis in Hz, common to all sweeps.
    pub frequency_hz: Vec<f64>,
    /// A-wave matrices, indexed `[sweep][frequency]`.
    pub a_waves: Vec<Vec<TwoPort>>,
    /// B-wave matrices, indexed `[sweep][frequency]`.
    pub b_waves: Vec<Vec<TwoPort>>,
    /// One timing record per acquired sweep.
    pub timings: Vec<SweepTiming>,
    /// As-applied settings summary.
    pub settings: SweepSettings,
}

impl RawSweep {
    pub fn sweeps(&self) -> usize {
        self.a_waves.len()
    }

    pub fn points(&self) -> usize {
        self.frequency_hz.len()
    }

    /// Switch-term corrected S-parameters, `S = B · A⁻¹` per frequency
    /// point, indexed `[sweep][frequency]`.
    pub fn s_parameters(&self) -> Result<Vec<Vec<TwoPort>>, VnaError> {
        self.a_waves
            .iter()
            .zip(&self.b_waves)
            .map(|(a_sweep, b_sweep)| {
                a_sweep
                    .iter()
                    .zip(b_sweep)
                    .enumerate()
                    .map(|(k, (a, b))| {
                        let inv = a.inverse().ok_or(VnaError::SingularMatrix(k))?;
                        Ok(b.mul(&inv))
                    })
                    .collect()
            })
            .collect()
    }

    /// Across-sweep mean of the S-parameters, per frequency point.
    pub fn mean_s(&self) -> Result<Vec<TwoPort>, VnaError> {
        let s = self.s_parameters()?;
        if s.is_empty() {
            return Err(VnaError::Data("no sweeps acquired".to_string()));
        }
        (0..self.frequency_hz.len())
            .map(|k| {
                let column: Vec<TwoPort> = s.iter().map(|sweep| sweep[k]).collect();
                TwoPort::mean(&column)
                    .ok_or_else(|| VnaError::Data("no sweeps acquired".to_string()))
            })
            .collect()
    }

    /// Write one `.s2p` per sweep and wave kind: `<name>_A_01.s2p`, ...,
    /// `<name>_B_NN.s2p`, with the index zero-padded to the sweep count.
    pub fn write_wave_series(&self, dir: &Path, name: &str) -> Result<Vec<PathBuf>, VnaError> {
        let width = digit_width(self.sweeps());
        let mut written = Vec::new();
        for (label, waves) in [("A", &self.a_waves), ("B", &self.b_waves)] {
            for (i, data) in waves.iter().enumerate() {
                let comments = sweep_comment_block(label, self.timings.get(i), &self.settings)?;
                let path = dir.join(format!("{name}_{label}_{:0width$}.s2p", i + 1));
                TouchstoneFile::new(self.frequency_hz.clone(), data.clone())?
                    .with_comments(comments)
                    .write(&path)?;
                written.push(path);
            }
        }
        Ok(written)
    }

    /// Write the across-sweep mean S-parameters as `<name>_S_mean.s2p`.
    pub fn write_mean_s(&self, dir: &Path, name: &str) -> Result<PathBuf, VnaError> {
        let mean = self.mean_s()?;
        let comments = sweep_comment_block("S (mean over sweeps)", None, &self.settings)?;
        let path = dir.join(format!("{name}_S_mean.s2p"));
        TouchstoneFile::new(self.frequency_hz.clone(), mean)?
            .with_comments(comments)
            .write(&path)?;
        Ok(path)
    }
}

/// Run a raw wave-parameter acquisition from a configuration.
///
/// Connects to the configured instrument (or builds the mock), then runs
/// [`run_raw_sweep`].
pub async fn raw_sweep(config: &SweepConfig) -> Result<RawSweep> {
    config.validate()?;
    let vna = if config.mock {
        tracing::info!("using mock VectorStar instrument");
        VectorStar::with_client(Arc::new(MockVectorStar::new()))
    } else {
        let resource: VisaResource = config.address.parse()?;
        VectorStar::connect(&resource, Duration::from_millis(config.timeout_ms)).await?
    };
    run_raw_sweep(&vna, config).await
}

/// Run a raw acquisition against an already-connected driver.
///
/// The instrument settings backup is restored even when acquisition fails;
/// restore failures are logged and the acquisition error wins.
pub async fn run_raw_sweep(vna: &VectorStar, config: &SweepConfig) -> Result<RawSweep> {
    config.validate()?;
    vna.initialize()
        .await
        .context("failed to initialize instrument session")?;
    let backup = vna
        .backup_settings()
        .await
        .context("failed to back up instrument settings")?;

    let result = acquire(vna, config).await;

    if let Err(e) = vna.restore_settings(&backup).await {
        tracing::warn!("failed to restore instrument settings: {e:#}");
    }
    if let Err(e) = vna.continuous().await {
        tracing::warn!("failed to resume continuous sweep: {e:#}");
    }
    if let Err(e) = vna.to_local().await {
        tracing::warn!("failed to return instrument to local control: {e:#}");
    }

    result
}

async fn acquire(vna: &VectorStar, config: &SweepConfig) -> Result<RawSweep> {
    vna.prepare_raw_acquisition(config)
        .await
        .context("failed to configure instrument")?;
    let settings = vna
        .read_settings_summary()
        .await
        .context("failed to read back sweep settings")?;
    tracing::info!(
        "sweep: {} points, {:.6}-{:.6} GHz, IF bandwidth {} Hz",
        settings.sweep_points,
        settings.freq_start_hz / 1e9,
        settings.freq_stop_hz / 1e9,
        settings.if_bandwidth_hz
    );

    vna.binary_transfer().await?;

    let width = digit_width(config.sweeps);
    let mut a_waves = Vec::with_capacity(config.sweeps);
    let mut b_waves = Vec::with_capacity(config.sweeps);
    let mut timings = Vec::with_capacity(config.sweeps);
    let total_timer = Instant::now();

    for sweep in 0..config.sweeps {
        vna.hold().await?;
        vna.trigger_single().await?;

        let started = Utc::now();
        let timer = Instant::now();
        let mut traces = Vec::with_capacity(WAVE_TRACES.len());
        for slot in 1..=WAVE_TRACES.len() {
            traces.push(
                vna.read_trace(slot)
                    .await
                    .with_context(|| format!("sweep {} of {}", sweep + 1, config.sweeps))?,
            );
        }
        let duration_s = timer.elapsed().as_secs_f64();

        let (a, b) = assemble_wave_matrices(&traces)?;
        a_waves.push(a);
        b_waves.push(b);
        timings.push(SweepTiming {
            started,
            duration_s,
        });

        let remaining = (config.sweeps - sweep - 1) as f64 * duration_s;
        tracing::info!(
            "sweep {:0width$}/{} done in {:.2} s (est. remaining {})",
            sweep + 1,
            config.sweeps,
            duration_s,
            format_hms(remaining),
        );
    }
    tracing::info!(
        "total sweep time {:.2} s",
        total_timer.elapsed().as_secs_f64()
    );

    let frequency_hz = vna.read_frequencies().await?;
    vna.ascii_transfer().await?;

    let points = frequency_hz.len();
    for (label, waves) in [("A", &a_waves), ("B", &b_waves)] {
        for per_sweep in waves.iter() {
            if per_sweep.len() != points {
                return Err(VnaError::Data(format!(
                    "{label}-wave sweep has {} points but the frequency axis has {points}",
                    per_sweep.len()
                ))
                .into());
            }
        }
    }

    Ok(RawSweep {
        frequency_hz,
        a_waves,
        b_waves,
        timings,
        settings,
    })
}

/// Reassemble the eight trace reads into per-frequency A and B matrices.
fn assemble_wave_matrices(
    traces: &[Vec<Complex64>],
) -> Result<(Vec<TwoPort>, Vec<TwoPort>), VnaError> {
    if traces.len() != WAVE_TRACES.len() {
        return Err(VnaError::Data(format!(
            "expected {} traces, got {}",
            WAVE_TRACES.len(),
            traces.len()
        )));
    }
    let points = traces[0].len();
    if traces.iter().any(|t| t.len() != points) {
        return Err(VnaError::Data(
            "traces disagree in point count".to_string(),
        ));
    }

    let mut a = Vec::with_capacity(points);
    let mut b = Vec::with_capacity(points);
    for k in 0..points {
        a.push(TwoPort::new([
            [traces[0][k], traces[1][k]],
            [traces[2][k], traces[3][k]],
        ]));
        b.push(TwoPort::new([
            [traces[4][k], traces[5][k]],
            [traces[6][k], traces[7][k]],
        ]));
    }
    Ok((a, b))
}

fn digit_width(n: usize) -> usize {
    n.max(1).to_string().len()
}

fn format_hms(seconds: f64) -> String {
    let total = seconds.round().max(0.0) as u64;
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn wave_assembly_maps_slots_to_matrix_elements() {
        // Trace m carries constant value m; (rx, tx) should read 2·rx + tx
        let traces: Vec<Vec<Complex64>> = (0..8).map(|m| vec![c(m as f64, 0.0); 3]).collect();
        let (a, b) = assemble_wave_matrices(&traces).unwrap();
        assert_eq!(a.len(), 3);
        for k in 0..3 {
            for rx in 0..2 {
                for tx in 0..2 {
                    let slot = (2 * rx + tx) as f64;
                    assert_eq!(a[k].get(rx, tx), c(slot, 0.0));
                    assert_eq!(b[k].get(rx, tx), c(slot + 4.0, 0.0));
                }
            }
        }
    }

    #[test]
    fn wave_assembly_rejects_ragged_traces() {
        let mut traces: Vec<Vec<Complex64>> = (0..8).map(|_| vec![c(0.0, 0.0); 3]).collect();
        traces[5].pop();
        assert!(assemble_wave_matrices(&traces).is_err());
    }

    #[test]
    fn config_validation() {
        let mut config = SweepConfig::mock();
        assert!(config.validate().is_ok());

        config.sweeps = 0;
        assert!(config.validate().is_err());
        config.sweeps = 1;

        config.points = Some(1);
        assert!(config.validate().is_err());
        config.points = Some(2);

        config.freq_start = Some(2.0e9);
        config.freq_stop = Some(1.0e9);
        assert!(config.validate().is_err());
        config.freq_stop = Some(3.0e9);
        assert!(config.validate().is_ok());

        config.mock = false;
        assert!(config.validate().is_err(), "hardware run needs an address");
        config.address = "TCPIP::10.0.0.1::INSTR".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_parses_from_toml() {
        let config: SweepConfig = toml::from_str(
            r#"
            address = "TCPIP::169.254.63.67::INSTR"
            sweeps = 100
            if_bandwidth = 1000.0
            freq_start = 1e9
            freq_stop = 150e9
            points = 299
            power = -10.0
            power_extended = -10.0
            "#,
        )
        .unwrap();
        assert_eq!(config.sweeps, 100);
        assert_eq!(config.points, Some(299));
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert!(!config.mock);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_rejects_unknown_keys() {
        assert!(toml::from_str::<SweepConfig>("bogus = 1\n").is_err());
    }

    #[test]
    fn hms_formatting() {
        assert_eq!(format_hms(0.0), "0:00:00");
        assert_eq!(format_hms(62.4), "0:01:02");
        assert_eq!(format_hms(3723.0), "1:02:03");
        assert_eq!(format_hms(-5.0), "0:00:00");
    }

    #[test]
    fn mean_s_equals_b_when_a_is_identity() {
        let eye = TwoPort::new([[c(1.0, 0.0), c(0.0, 0.0)], [c(0.0, 0.0), c(1.0, 0.0)]]);
        let b0 = TwoPort::new([[c(0.2, 0.0), c(0.4, 0.0)], [c(0.6, 0.0), c(0.8, 0.0)]]);
        let b1 = TwoPort::new([[c(0.4, 0.0), c(0.6, 0.0)], [c(0.8, 0.0), c(1.0, 0.0)]]);
        let raw = RawSweep {
            frequency_hz: vec![1.0e9],
            a_waves: vec![vec![eye], vec![eye]],
            b_waves: vec![vec![b0], vec![b1]],
            timings: Vec::new(),
            settings: test_settings(),
        };
        let mean = raw.mean_s().unwrap();
        assert_eq!(mean.len(), 1);
        assert!((mean[0].get(0, 0).re - 0.3).abs() < 1e-12);
        assert!((mean[0].get(1, 1).re - 0.9).abs() < 1e-12);
    }

    fn test_settings() -> SweepSettings {
        SweepSettings {
            power_port1_dbm: -10.0,
            power_port2_dbm: -10.0,
            power_ext_port1_dbm: -10.0,
            power_ext_port2_dbm: -10.0,
            if_bandwidth_hz: 1000.0,
            freq_start_hz: 1.0e9,
            freq_stop_hz: 2.0e9,
            sweep_points: 2,
        }
    }
}
