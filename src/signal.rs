use crate::device::LinkStatus;
use crate::feed::ChartData;
use crate::location::LocationFix;
use crate::measurement::{DashboardMetrics, Metric};
use crate::session::SessionStatus;


/// Core -> GUI.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreSignal {
    LinkStatus {
        status: LinkStatus,
        text: String,
    },
    DiscoveredPeripherals(Vec<String>),
    Metric(Metric, String),
    Notice(String),
    Timer(String),
    Session(SessionStatus),
    Chart(ChartData),
}

/// GUI -> core.
#[derive(Debug, Clone, PartialEq)]
pub enum GuiSignal {
    StartScanning,
    Connect,
    ConnectDevice(String),
    Disconnect,
    StartSession,
    PauseSession,
    StopSession,
    SetDuration(u32),
    SetBackgroundSound(String),
    SetVoiceGuide(String),
    SetVoiceVolume(f32),
    ExternalMetrics(DashboardMetrics),
    LocationUpdate(LocationFix),
    SetLocationWatching(bool),
}
