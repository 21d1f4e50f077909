use serde::{Deserialize, Serialize};

use crate::error::DecodeFailure;


/// Width of the primary value inside a measurement payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueWidth {
    U8,
    U16Le,
}

impl ValueWidth {
    fn len(self) -> usize {
        match self {
            ValueWidth::U8 => 1,
            ValueWidth::U16Le => 2,
        }
    }
}

/// Where the heart rate lives in a raw notification. The default is the
/// one-byte-flags, one-byte-value layout: offset 1, single unsigned byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementFormat {
    pub offset: usize,
    pub width: ValueWidth,
}

impl Default for MeasurementFormat {
    fn default() -> Self {
        Self {
            offset: 1,
            width: ValueWidth::U8,
        }
    }
}

impl MeasurementFormat {
    pub fn decode(&self, payload: &[u8]) -> Result<Reading, DecodeFailure> {
        let end = self.offset.checked_add(self.width.len());
        let Some(bytes) = end.and_then(|end| payload.get(self.offset..end)) else {
            // An offset near usize::MAX can never fit
            return Err(DecodeFailure { len: payload.len(), needed: end.unwrap_or(usize::MAX) });
        };

        let heart_rate = match self.width {
            ValueWidth::U8 => u16::from(bytes[0]),
            ValueWidth::U16Le => u16::from_le_bytes([bytes[0], bytes[1]]),
        };

        Ok(Reading { heart_rate })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub heart_rate: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    HeartRate,
    Spo2,
    MoodScore,
}

/// One dashboard update. Only the fields that are present get shown.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DashboardMetrics {
    pub heart_rate: Option<u16>,
    pub spo2: Option<f32>,
    pub mood_score: Option<f32>,
}

impl From<Reading> for DashboardMetrics {
    fn from(reading: Reading) -> Self {
        DashboardMetrics {
            heart_rate: Some(reading.heart_rate),
            ..Default::default()
        }
    }
}

impl DashboardMetrics {
    pub fn formatted(&self) -> Vec<(Metric, String)> {
        let mut out = vec![];
        if let Some(hr) = self.heart_rate {
            out.push((Metric::HeartRate, format!("{hr} BPM")));
        }
        if let Some(spo2) = self.spo2 {
            out.push((Metric::Spo2, format!("{spo2}%")));
        }
        if let Some(mood) = self.mood_score {
            out.push((Metric::MoodScore, format!("{mood}/100")));
        }
        out
    }
}
