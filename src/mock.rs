//! Mock VectorStar instrument for testing without hardware.
//!
//! Implements [`ScpiOps`] against an in-memory settings store covering every
//! command the driver issues. Trace data is synthesized deterministically:
//! A-wave traces form the identity matrix at every frequency point and
//! B-wave traces carry distinct receiver/port/frequency-dependent values, so
//! converted S-parameters equal the B waves exactly.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use num_complex::Complex64;
use tokio::sync::Mutex;

use crate::scpi::ScpiOps;

const TRACE_SLOTS: usize = 16;

/// One display trace slot: its parameter definition and display format.
#[derive(Debug, Clone)]
pub struct MockTrace {
    pub define: String,
    pub format: String,
}

/// Snapshot of the mock instrument state, for assertions in tests.
#[derive(Debug, Clone)]
pub struct MockSnapshot {
    pub fabcal_receiver: String,
    pub fabcal_rf: String,
    pub user_cal: String,
    pub power_port1: String,
    pub power_port2: String,
    pub power_ext_port1: String,
    pub power_ext_port2: String,
    pub if_bandwidth: String,
    pub freq_start: String,
    pub freq_stop: String,
    pub points: String,
    pub trace_count: String,
    pub traces: Vec<MockTrace>,
    pub hold: bool,
    pub binary: bool,
    pub remote: bool,
    pub sweeps_triggered: usize,
}

#[derive(Debug)]
struct State {
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
    traces: Vec<MockTrace>,
    selected: usize,
    hold: bool,
    binary: bool,
    remote: bool,
    triggered: bool,
    sweeps_triggered: usize,
}

impl Default for State {
    fn default() -> Self {
        let defines = ["S11", "S12", "S21", "S22"];
        let traces = (0..TRACE_SLOTS)
            .map(|i| MockTrace {
                define: defines[i % defines.len()].to_string(),
                format: "LOGPH".to_string(),
            })
            .collect();
        Self {
            fabcal_receiver: "1".to_string(),
            fabcal_rf: "1".to_string(),
            user_cal: "1".to_string(),
            power_port1: "-10".to_string(),
            power_port2: "-10".to_string(),
            power_ext_port1: "-10".to_string(),
            power_ext_port2: "-10".to_string(),
            if_bandwidth: "1000".to_string(),
            freq_start: "70000".to_string(),
            freq_stop: "70000000000".to_string(),
            points: "401".to_string(),
            trace_count: "4".to_string(),
            traces,
            selected: 1,
            hold: false,
            binary: false,
            remote: true,
            triggered: false,
            sweeps_triggered: 0,
        }
    }
}

/// Simulated VectorStar VNA.
pub struct MockVectorStar {
    state: Mutex<State>,
}

impl Default for MockVectorStar {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVectorStar {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Current instrument state, for assertions.
    pub async fn snapshot(&self) -> MockSnapshot {
        let s = self.state.lock().await;
        MockSnapshot {
            fabcal_receiver: s.fabcal_receiver.clone(),
            fabcal_rf: s.fabcal_rf.clone(),
            user_cal: s.user_cal.clone(),
            power_port1: s.power_port1.clone(),
            power_port2: s.power_port2.clone(),
            power_ext_port1: s.power_ext_port1.clone(),
            power_ext_port2: s.power_ext_port2.clone(),
            if_bandwidth: s.if_bandwidth.clone(),
            freq_start: s.freq_start.clone(),
            freq_stop: s.freq_stop.clone(),
            points: s.points.clone(),
            trace_count: s.trace_count.clone(),
            traces: s.traces.clone(),
            hold: s.hold,
            binary: s.binary,
            remote: s.remote,
            sweeps_triggered: s.sweeps_triggered,
        }
    }

    /// The B-wave value the mock emits for `(rx, tx)` at frequency index `k`.
    ///
    /// A waves are the identity, so this is also the S-parameter the
    /// conversion should produce.
    pub fn expected_b(rx: usize, tx: usize, k: usize) -> Complex64 {
        Complex64::new(0.3 + 0.1 * rx as f64 + 0.05 * tx as f64, 0.002 * k as f64)
    }

    fn frequencies(state: &State) -> Result<Vec<f64>> {
        let start: f64 = state
            .freq_start
            .parse()
            .context("mock state: bad start frequency")?;
        let stop: f64 = state
            .freq_stop
            .parse()
            .context("mock state: bad stop frequency")?;
        let n: usize = state.points.parse().context("mock state: bad point count")?;
        if n < 2 {
            return Ok(vec![start]);
        }
        let step = (stop - start) / (n - 1) as f64;
        Ok((0..n).map(|k| start + step * k as f64).collect())
    }

    fn wave_for(define: &str, k: usize) -> Option<Complex64> {
        let parts: Vec<&str> = define.split(',').collect();
        if parts.len() != 4 || parts[0] != "USR" {
            return None;
        }
        let tx = match parts[3] {
            "PORT1" => 0,
            "PORT2" => 1,
            _ => return None,
        };
        match parts[1] {
            "A1" | "A2" => {
                let rx = usize::from(parts[1] == "A2");
                if rx == tx {
                    Some(Complex64::new(1.0, 0.0))
                } else {
                    Some(Complex64::new(0.0, 0.0))
                }
            }
            "B1" | "B2" => {
                let rx = usize::from(parts[1] == "B2");
                Some(Self::expected_b(rx, tx, k))
            }
            _ => None,
        }
    }

    fn apply_write(state: &mut State, command: &str) -> Result<()> {
        let upper = command.to_uppercase();
        let (head, arg) = match upper.split_once(' ') {
            Some((h, a)) => (h, a.trim()),
            None => (upper.as_str(), ""),
        };

        match head {
            "LANG" | ":SYSTEM:ERROR:CLEAR" | ":DISPLAY:WINDOW1:ACTIVATE"
            | ":SENSE1:OFFSET:PHASE:SYNCHRONIZATION" => {}
            "FRCVCALON" => state.fabcal_receiver = arg.to_string(),
            "FRFCALON" => state.fabcal_rf = arg.to_string(),
            ":SENSE1:CORRECTION:STATE" => state.user_cal = arg.to_string(),
            ":SOURCE1:POWER:PORT1" => state.power_port1 = arg.to_string(),
            ":SOURCE1:POWER:PORT2" => state.power_port2 = arg.to_string(),
            ":SOURCE1:MODBB:POWER:PORT1" => state.power_ext_port1 = arg.to_string(),
            ":SOURCE1:MODBB:POWER:PORT2" => state.power_ext_port2 = arg.to_string(),
            ":SENSE1:BWIDTH" => state.if_bandwidth = arg.to_string(),
            ":SENSE1:FREQUENCY:START" => state.freq_start = arg.to_string(),
            ":SENSE1:FREQUENCY:STOP" => state.freq_stop = arg.to_string(),
            ":SENSE1:SWEEP:POINT" => state.points = arg.to_string(),
            ":CALCULATE1:PARAMETER:COUNT" => state.trace_count = arg.to_string(),
            ":SENSE:HOLD:FUNCTION" => match arg {
                "HOLD" => state.hold = true,
                "CONTINUOUS" => {
                    state.hold = false;
                    state.triggered = false;
                }
                other => bail!("mock: unknown hold function '{other}'"),
            },
            ":TRIG:SING" => {
                state.triggered = true;
                state.sweeps_triggered += 1;
            }
            "LSB" => {}
            "FMB" => state.binary = true,
            "FMA" => state.binary = false,
            "RTL" => state.remote = false,
            _ => {
                if let Some(rest) = head.strip_prefix(":CALCULATE1:PARAMETER") {
                    Self::apply_trace_write(state, rest, arg)?;
                } else {
                    tracing::warn!("mock: unknown write command: {command}");
                }
            }
        }
        Ok(())
    }

    fn trace_index(digits: &str) -> Result<usize> {
        let index: usize = digits.parse().context("mock: bad trace index")?;
        if index == 0 || index > TRACE_SLOTS {
            bail!("mock: trace index {index} out of range");
        }
        Ok(index)
    }

    fn apply_trace_write(state: &mut State, rest: &str, arg: &str) -> Result<()> {
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        let index = Self::trace_index(&digits)?;
        match &rest[digits.len()..] {
            ":FORMAT" => state.traces[index - 1].format = arg.to_string(),
            ":DEFINE" => state.traces[index - 1].define = arg.to_string(),
            ":SELECT" => state.selected = index,
            other => bail!("mock: unknown trace command ':CALCULATE1:PARAMETER{index}{other}'"),
        }
        Ok(())
    }

    fn answer_query(state: &State, query: &str) -> Result<String> {
        let upper = query.to_uppercase();
        let answer = match upper.as_str() {
            "*IDN?" => "ANRITSU,MS4647B,MOCK0001,V2023.6.1".to_string(),
            "FRCVCALON?" => state.fabcal_receiver.clone(),
            "FRFCALON?" => state.fabcal_rf.clone(),
            ":SENSE1:CORRECTION:STATE?" => state.user_cal.clone(),
            ":SOURCE1:POWER:PORT1?" => state.power_port1.clone(),
            ":SOURCE1:POWER:PORT2?" => state.power_port2.clone(),
            ":SOURCE1:MODBB:POWER:PORT1?" => state.power_ext_port1.clone(),
            ":SOURCE1:MODBB:POWER:PORT2?" => state.power_ext_port2.clone(),
            ":SENSE1:BWIDTH?" => state.if_bandwidth.clone(),
            ":SENSE1:FREQUENCY:START?" => state.freq_start.clone(),
            ":SENSE1:FREQUENCY:STOP?" => state.freq_stop.clone(),
            ":SENSE1:SWEEP:POINT?" => state.points.clone(),
            ":CALCULATE1:PARAMETER:COUNT?" => state.trace_count.clone(),
            _ => {
                if let Some(rest) = upper.strip_prefix(":CALCULATE1:PARAMETER") {
                    let digits: String =
                        rest.chars().take_while(|c| c.is_ascii_digit()).collect();
                    let index = Self::trace_index(&digits)?;
                    match &rest[digits.len()..] {
                        ":FORMAT?" => state.traces[index - 1].format.clone(),
                        ":DEFINE?" => state.traces[index - 1].define.clone(),
                        other => bail!(
                            "mock: unknown trace query ':CALCULATE1:PARAMETER{index}{other}'"
                        ),
                    }
                } else {
                    bail!("mock: unknown query: {query}");
                }
            }
        };
        Ok(answer)
    }
}

#[async_trait]
impl ScpiOps for MockVectorStar {
    async fn write(&self, command: &str) -> Result<()> {
        tracing::debug!("mock SCPI write: {command}");
        let mut state = self.state.lock().await;
        for part in command.split(';') {
            let part = part.trim();
            if !part.is_empty() {
                Self::apply_write(&mut state, part)?;
            }
        }
        Ok(())
    }

    async fn query(&self, query: &str) -> Result<String> {
        tracing::debug!("mock SCPI query: {query}");
        let state = self.state.lock().await;
        Self::answer_query(&state, query)
    }

    async fn query_binary_f64(&self, query: &str) -> Result<Vec<f64>> {
        tracing::debug!("mock SCPI binary query: {query}");
        let state = self.state.lock().await;
        if !state.binary {
            bail!("mock: binary query '{query}' while in ASCII transfer mode");
        }
        match query.to_uppercase().as_str() {
            ":CALCULATE1:DATA:FDATA?" => {
                if !(state.hold && state.triggered) {
                    bail!("mock: trace data requested without a held, triggered sweep");
                }
                let define = state.traces[state.selected - 1].define.to_uppercase();
                let n = Self::frequencies(&state)?.len();
                let mut out = Vec::with_capacity(2 * n);
                for k in 0..n {
                    let value = Self::wave_for(&define, k).ok_or_else(|| {
                        anyhow::anyhow!("mock: trace {} is not a wave parameter: '{define}'",
                            state.selected)
                    })?;
                    out.push(value.re);
                    out.push(value.im);
                }
                Ok(out)
            }
            ":SENSE1:FREQUENCY:DATA?" => Self::frequencies(&state),
            other => bail!("mock: unknown binary query: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn query_reads_back_written_settings() {
        let mock = MockVectorStar::new();
        mock.write(":SENSe1:BWIDth 100").await.unwrap();
        assert_eq!(mock.query(":SENSe1:BWIDth?").await.unwrap(), "100");

        mock.write(":SOURce1:POWer:PORT1 -15").await.unwrap();
        assert_eq!(mock.query(":SOURce1:POWer:PORT1?").await.unwrap(), "-15");
    }

    #[tokio::test]
    async fn compound_commands_split_on_semicolon() {
        let mock = MockVectorStar::new();
        mock.write("LSB;FMB").await.unwrap();
        assert!(mock.snapshot().await.binary);
        mock.write("FMA").await.unwrap();
        assert!(!mock.snapshot().await.binary);
    }

    #[tokio::test]
    async fn trace_slots_are_independent() {
        let mock = MockVectorStar::new();
        mock.write(":CALCulate1:PARameter3:DEFine USR,A2,1,PORT1")
            .await
            .unwrap();
        mock.write(":CALCulate1:PARameter3:FORMat REIMaginary")
            .await
            .unwrap();
        assert_eq!(
            mock.query(":CALCulate1:PARameter3:DEFine?").await.unwrap(),
            "USR,A2,1,PORT1"
        );
        assert_eq!(
            mock.query(":CALCulate1:PARameter1:DEFine?").await.unwrap(),
            "S11"
        );
    }

    #[tokio::test]
    async fn trace_data_requires_binary_mode_and_trigger() {
        let mock = MockVectorStar::new();
        assert!(mock
            .query_binary_f64(":CALCulate1:DATA:FDATa?")
            .await
            .is_err());

        mock.write("LSB;FMB").await.unwrap();
        assert!(mock
            .query_binary_f64(":CALCulate1:DATA:FDATa?")
            .await
            .is_err());

        mock.write(":SENSe:HOLD:FUNCtion HOLD").await.unwrap();
        mock.write(":TRIG:SING").await.unwrap();
        mock.write(":CALCulate1:PARameter1:DEFine USR,B1,1,PORT1")
            .await
            .unwrap();
        mock.write(":CALCulate1:PARameter1:SELect").await.unwrap();
        let data = mock
            .query_binary_f64(":CALCulate1:DATA:FDATa?")
            .await
            .unwrap();
        assert_eq!(data.len(), 2 * 401);
        assert_eq!(data[0], MockVectorStar::expected_b(0, 0, 0).re);
        assert_eq!(data[1], MockVectorStar::expected_b(0, 0, 0).im);
    }

    #[tokio::test]
    async fn frequency_data_matches_configured_grid() {
        let mock = MockVectorStar::new();
        mock.write(":SENSe1:FREQuency:STARt 1000000000").await.unwrap();
        mock.write(":SENSe1:FREQuency:STOP 2000000000").await.unwrap();
        mock.write(":SENSe1:SWEep:POINt 3").await.unwrap();
        mock.write("LSB;FMB").await.unwrap();

        let f = mock
            .query_binary_f64(":SENSe1:FREQuency:DATA?")
            .await
            .unwrap();
        assert_eq!(f, vec![1.0e9, 1.5e9, 2.0e9]);
    }

    #[tokio::test]
    async fn unknown_query_is_an_error() {
        let mock = MockVectorStar::new();
        assert!(mock.query(":BOGUS:QUERY?").await.is_err());
    }
}
