//! Anritsu VectorStar instrument driver.
//!
//! Command sequences follow the VectorStar MS464xB programming manual. The
//! driver speaks through the [`ScpiOps`] seam so the mock instrument can
//! stand in for hardware, and backs up every setting it touches so a raw
//! acquisition leaves the instrument the way it found it.
//!
//! Raw acquisition redefines the first eight display traces to the wave
//! parameters A1/A2/B1/B2 against source ports 1 and 2, in real/imaginary
//! format, and reads them back as binary blocks.

use anyhow::{Context, Result};
use num_complex::Complex64;
use std::sync::Arc;
use std::time::Duration;

use crate::error::VnaError;
use crate::resource::VisaResource;
use crate::scpi::{ScpiClient, ScpiOps};
use crate::sweep::{SweepConfig, SweepSettings};

/// Wave-parameter trace definitions, in slot order 1..=8.
pub const WAVE_TRACES: [&str; 8] = [
    "USR,A1,1,PORT1",
    "USR,A1,1,PORT2",
    "USR,A2,1,PORT1",
    "USR,A2,1,PORT2",
    "USR,B1,1,PORT1",
    "USR,B1,1,PORT2",
    "USR,B2,1,PORT1",
    "USR,B2,1,PORT2",
];

/// One backed-up display trace: definition and display format.
#[derive(Debug, Clone)]
struct TraceSetting {
    define: String,
    format: String,
}

/// Snapshot of every instrument setting the raw acquisition overwrites.
///
/// Values are kept as the raw response strings and written back verbatim,
/// so restore does not depend on how the instrument formats numbers.
#[derive(Debug, Clone)]
pub struct SettingsBackup {
    fabcal_receiver: String,
    fabcal_rf: String,
    user_cal: String,
    power_port1: String,
    power_port2: String,
    power_ext_port1: String,
    power_ext_port2: String,
    if_bandwidth: String,
    freq_start: String,
    freq_stop: String,
    points: String,
    trace_count: String,
    traces: Vec<TraceSetting>,
}

/// Driver for an Anritsu VectorStar MS464xB vector network analyzer.
pub struct VectorStar {
    client: Arc<dyn ScpiOps>,
}

impl VectorStar {
    /// Connect to hardware and verify the link by querying the identity.
    pub async fn connect(resource: &VisaResource, timeout: Duration) -> Result<Self> {
        let client = ScpiClient::connect(resource).await?.with_timeout(timeout);
        let vna = Self {
            client: Arc::new(client),
        };
        let identity = vna
            .identity()
            .await
            .context("failed to identify instrument")?;
        tracing::info!("instrument identity: {identity}");
        Ok(vna)
    }

    /// Build a driver over an existing transport (mock or otherwise).
    pub fn with_client(client: Arc<dyn ScpiOps>) -> Self {
        Self { client }
    }

    pub async fn identity(&self) -> Result<String> {
        self.client.query("*IDN?").await
    }

    /// Session bring-up: native command set, clear the error queue, make
    /// channel 1 active, keep sources 1 and 2 phase-synchronized.
    pub async fn initialize(&self) -> Result<()> {
        self.client.write("LANG NATIVE").await?;
        self.client.write(":SYSTem:ERRor:CLEar").await?;
        self.client.write(":DISPlay:WINDow1:ACTivate 1").await?;
        self.client
            .write(":SENSe1:OFFSet:PHASe:SYNChronization ON")
            .await?;
        Ok(())
    }

    async fn query_f64(&self, query: &str) -> Result<f64> {
        let response = self.client.query(query).await?;
        response.trim().parse::<f64>().map_err(|e| {
            VnaError::Parse {
                query: query.to_string(),
                value: response.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    async fn query_u32(&self, query: &str) -> Result<u32> {
        let response = self.client.query(query).await?;
        response.trim().parse::<u32>().map_err(|e| {
            VnaError::Parse {
                query: query.to_string(),
                value: response.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Read back every setting the acquisition will overwrite.
    pub async fn backup_settings(&self) -> Result<SettingsBackup> {
        let fabcal_receiver = self.client.query("FRCVCALON?").await?;
        let fabcal_rf = self.client.query("FRFCALON?").await?;
        let user_cal = self.client.query(":SENSe1:CORRection:STATe?").await?;
        let power_port1 = self.client.query(":SOURce1:POWer:PORT1?").await?;
        let power_port2 = self.client.query(":SOURce1:POWer:PORT2?").await?;
        let power_ext_port1 = self.client.query(":SOURce1:MODBB:POWer:PORT1?").await?;
        let power_ext_port2 = self.client.query(":SOURce1:MODBB:POWer:PORT2?").await?;
        let if_bandwidth = self.client.query(":SENSe1:BWIDth?").await?;
        let freq_start = self.client.query(":SENSe1:FREQuency:STARt?").await?;
        let freq_stop = self.client.query(":SENSe1:FREQuency:STOP?").await?;
        let points = self.client.query(":SENSe1:SWEep:POINt?").await?;
        let trace_count = self.client.query(":CALCulate1:PARameter:COUNt?").await?;

        let mut traces = Vec::with_capacity(WAVE_TRACES.len());
        for slot in 1..=WAVE_TRACES.len() {
            let format = self
                .client
                .query(&format!(":CALCulate1:PARameter{slot}:FORMat?"))
                .await?;
            let define = self
                .client
                .query(&format!(":CALCulate1:PARameter{slot}:DEFine?"))
                .await?;
            traces.push(TraceSetting { define, format });
        }

        Ok(SettingsBackup {
            fabcal_receiver,
            fabcal_rf,
            user_cal,
            power_port1,
            power_port2,
            power_ext_port1,
            power_ext_port2,
            if_bandwidth,
            freq_start,
            freq_stop,
            points,
            trace_count,
            traces,
        })
    }

    /// Disable receiver calibration, apply the requested sweep settings,
    /// and point the first eight traces at the raw wave parameters.
    ///
    /// `None` config fields leave the instrument's current value alone.
    pub async fn prepare_raw_acquisition(&self, config: &SweepConfig) -> Result<()> {
        self.client.write("FRCVCALON 0").await?;
        self.client.write("FRFCALON 0").await?;
        self.client.write(":SENSe1:CORRection:STATe 0").await?;

        if let Some(dbm) = config.power {
            self.client
                .write(&format!(":SOURce1:POWer:PORT1 {dbm}"))
                .await?;
            self.client
                .write(&format!(":SOURce1:POWer:PORT2 {dbm}"))
                .await?;
        }
        // Extended source drives the mm-wave modules above 54 GHz
        if let Some(dbm) = config.power_extended {
            self.client
                .write(&format!(":SOURce1:MODBB:POWer:PORT1 {dbm}"))
                .await?;
            self.client
                .write(&format!(":SOURce1:MODBB:POWer:PORT2 {dbm}"))
                .await?;
        }

        if let Some(hz) = config.if_bandwidth {
            self.client.write(&format!(":SENSe1:BWIDth {hz}")).await?;
        }
        if let Some(hz) = config.freq_start {
            self.client
                .write(&format!(":SENSe1:FREQuency:STARt {hz}"))
                .await?;
        }
        if let Some(hz) = config.freq_stop {
            self.client
                .write(&format!(":SENSe1:FREQuency:STOP {hz}"))
                .await?;
        }
        if let Some(n) = config.points {
            self.client
                .write(&format!(":SENSe1:SWEep:POINt {n}"))
                .await?;
        }

        self.client
            .write(&format!(":CALCulate1:PARameter:COUNt {}", WAVE_TRACES.len()))
            .await?;
        for (i, define) in WAVE_TRACES.iter().enumerate() {
            let slot = i + 1;
            self.client
                .write(&format!(":CALCulate1:PARameter{slot}:FORMat REIMaginary"))
                .await?;
            self.client
                .write(&format!(":CALCulate1:PARameter{slot}:DEFine {define}"))
                .await?;
        }

        Ok(())
    }

    /// The as-applied sweep settings, read back for logging and file headers.
    pub async fn read_settings_summary(&self) -> Result<SweepSettings> {
        Ok(SweepSettings {
            power_port1_dbm: self.query_f64(":SOURce1:POWer:PORT1?").await?,
            power_port2_dbm: self.query_f64(":SOURce1:POWer:PORT2?").await?,
            power_ext_port1_dbm: self.query_f64(":SOURce1:MODBB:POWer:PORT1?").await?,
            power_ext_port2_dbm: self.query_f64(":SOURce1:MODBB:POWer:PORT2?").await?,
            if_bandwidth_hz: self.query_f64(":SENSe1:BWIDth?").await?,
            freq_start_hz: self.query_f64(":SENSe1:FREQuency:STARt?").await?,
            freq_stop_hz: self.query_f64(":SENSe1:FREQuency:STOP?").await?,
            sweep_points: self.query_u32(":SENSe1:SWEep:POINt?").await?,
        })
    }

    /// Write the backed-up settings back, newest change first.
    pub async fn restore_settings(&self, backup: &SettingsBackup) -> Result<()> {
        for (i, trace) in backup.traces.iter().enumerate() {
            let slot = i + 1;
            self.client
                .write(&format!(
                    ":CALCulate1:PARameter{slot}:FORMat {}",
                    trace.format
                ))
                .await?;
            self.client
                .write(&format!(
                    ":CALCulate1:PARameter{slot}:DEFine {}",
                    trace.define
                ))
                .await?;
        }
        self.client
            .write(&format!(
                ":CALCulate1:PARameter:COUNt {}",
                backup.trace_count
            ))
            .await?;
        self.client
            .write(&format!(":SENSe1:BWIDth {}", backup.if_bandwidth))
            .await?;
        self.client
            .write(&format!(":SENSe1:FREQuency:STARt {}", backup.freq_start))
            .await?;
        self.client
            .write(&format!(":SENSe1:FREQuency:STOP {}", backup.freq_stop))
            .await?;
        self.client
            .write(&format!(":SENSe1:SWEep:POINt {}", backup.points))
            .await?;
        self.client
            .write(&format!(
                ":SOURce1:MODBB:POWer:PORT1 {}",
                backup.power_ext_port1
            ))
            .await?;
        self.client
            .write(&format!(
                ":SOURce1:MODBB:POWer:PORT2 {}",
                backup.power_ext_port2
            ))
            .await?;
        self.client
            .write(&format!(":SOURce1:POWer:PORT1 {}", backup.power_port1))
            .await?;
        self.client
            .write(&format!(":SOURce1:POWer:PORT2 {}", backup.power_port2))
            .await?;
        self.client
            .write(&format!(":SENSe1:CORRection:STATe {}", backup.user_cal))
            .await?;
        self.client
            .write(&format!("FRCVCALON {}", backup.fabcal_receiver))
            .await?;
        self.client
            .write(&format!("FRFCALON {}", backup.fabcal_rf))
            .await?;
        Ok(())
    }

    /// Hold the sweep so single triggers control acquisition.
    pub async fn hold(&self) -> Result<()> {
        self.client.write(":SENSe:HOLD:FUNCtion HOLD").await
    }

    /// Resume free-running sweeps.
    pub async fn continuous(&self) -> Result<()> {
        self.client.write(":SENSe:HOLD:FUNCtion CONTinuous").await
    }

    /// Run one sweep. Completion is observed by the next data query
    /// blocking until the instrument responds.
    pub async fn trigger_single(&self) -> Result<()> {
        self.client.write(":TRIG:SING").await
    }

    /// Switch trace readout to little-endian 64-bit binary blocks.
    pub async fn binary_transfer(&self) -> Result<()> {
        self.client.write("LSB;FMB").await
    }

    /// Switch trace readout back to ASCII.
    pub async fn ascii_transfer(&self) -> Result<()> {
        self.client.write("FMA").await
    }

    /// Return the instrument front panel to local control.
    pub async fn to_local(&self) -> Result<()> {
        self.client.write("RTL").await
    }

    /// Select trace `slot` and read its formatted data as complex values.
    pub async fn read_trace(&self, slot: usize) -> Result<Vec<Complex64>> {
        self.client
            .write(&format!(":CALCulate1:PARameter{slot}:SELect"))
            .await?;
        let raw = self
            .client
            .query_binary_f64(":CALCulate1:DATA:FDATa?")
            .await
            .with_context(|| format!("failed to read trace {slot}"))?;
        if raw.len() % 2 != 0 {
            return Err(VnaError::BinaryBlock(format!(
                "trace {slot}: odd value count {}, expected re/im pairs",
                raw.len()
            ))
            .into());
        }
        Ok(raw
            .chunks_exact(2)
            .map(|pair| Complex64::new(pair[0], pair[1]))
            .collect())
    }

    /// Read the frequency axis in Hz.
    pub async fn read_frequencies(&self) -> Result<Vec<f64>> {
        self.client
            .query_binary_f64(":SENSe1:FREQuency:DATA?")
            .await
            .context("failed to read frequency data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockVectorStar;

    fn mock_driver() -> (Arc<MockVectorStar>, VectorStar) {
        let mock = Arc::new(MockVectorStar::new());
        let vna = VectorStar::with_client(mock.clone());
        (mock, vna)
    }

    fn config() -> SweepConfig {
        SweepConfig {
            if_bandwidth: Some(100.0),
            freq_start: Some(1.0e9),
            freq_stop: Some(2.0e9),
            points: Some(11),
            power: Some(-15.0),
            power_extended: Some(-12.0),
            ..SweepConfig::mock()
        }
    }

    #[tokio::test]
    async fn identity_mentions_the_model() {
        let (_, vna) = mock_driver();
        let idn = vna.identity().await.unwrap();
        assert!(idn.contains("MS4647B"));
    }

    #[tokio::test]
    async fn prepare_applies_config_and_wave_traces() {
        let (mock, vna) = mock_driver();
        vna.initialize().await.unwrap();
        vna.prepare_raw_acquisition(&config()).await.unwrap();

        let snap = mock.snapshot().await;
        assert_eq!(snap.user_cal, "0");
        assert_eq!(snap.fabcal_receiver, "0");
        assert_eq!(snap.fabcal_rf, "0");
        assert_eq!(snap.if_bandwidth, "100");
        assert_eq!(snap.freq_start, "1000000000");
        assert_eq!(snap.freq_stop, "2000000000");
        assert_eq!(snap.points, "11");
        assert_eq!(snap.power_port1, "-15");
        assert_eq!(snap.power_ext_port2, "-12");
        assert_eq!(snap.trace_count, "8");
        for (i, define) in WAVE_TRACES.iter().enumerate() {
            assert_eq!(snap.traces[i].define, *define);
            assert_eq!(snap.traces[i].format, "REIMAGINARY");
        }
    }

    #[tokio::test]
    async fn backup_and_restore_round_trip() {
        let (mock, vna) = mock_driver();
        let before = mock.snapshot().await;

        let backup = vna.backup_settings().await.unwrap();
        vna.prepare_raw_acquisition(&config()).await.unwrap();
        vna.restore_settings(&backup).await.unwrap();

        let after = mock.snapshot().await;
        assert_eq!(after.user_cal, before.user_cal);
        assert_eq!(after.fabcal_receiver, before.fabcal_receiver);
        assert_eq!(after.if_bandwidth, before.if_bandwidth);
        assert_eq!(after.freq_start, before.freq_start);
        assert_eq!(after.freq_stop, before.freq_stop);
        assert_eq!(after.points, before.points);
        assert_eq!(after.power_port1, before.power_port1);
        assert_eq!(after.trace_count, before.trace_count);
        for slot in 0..WAVE_TRACES.len() {
            assert_eq!(after.traces[slot].define, before.traces[slot].define);
            assert_eq!(after.traces[slot].format, before.traces[slot].format);
        }
    }

    #[tokio::test]
    async fn read_trace_pairs_into_complex_values() {
        let (_, vna) = mock_driver();
        vna.initialize().await.unwrap();
        vna.prepare_raw_acquisition(&config()).await.unwrap();
        vna.binary_transfer().await.unwrap();
        vna.hold().await.unwrap();
        vna.trigger_single().await.unwrap();

        // Slot 5 is B1 driven from port 1
        let trace = vna.read_trace(5).await.unwrap();
        assert_eq!(trace.len(), 11);
        assert_eq!(trace[3], MockVectorStar::expected_b(0, 0, 3));
    }
}
