//! The session's instrument set.
//!
//! Each role is held in a [`Slot`]: present, degraded after losing its
//! connection mid-session, or absent from the start. Callers ask the slot for
//! a usable instrument instead of checking presence flags.

use crate::config::{LoadSettings, MeterSettings, Settings};
use crate::error::{InstrumentError, InstrumentRole};
use crate::hardware::capabilities::{Load, Meter};
use crate::hardware::daq6510::Daq6510;
use crate::hardware::ngl201::Ngl201;
use crate::hardware::scpi::TcpScpiClient;

/// Availability of one instrument role for the session.
pub enum Slot<T: ?Sized> {
    /// Connected and usable.
    Present(Box<T>),
    /// Was connected, lost its connection. Kept only so teardown can still
    /// attempt a best-effort release.
    Degraded {
        /// The instrument handle
        device: Box<T>,
        /// Why it was degraded
        reason: String,
    },
    /// Never connected.
    Absent {
        /// Why it is absent
        reason: String,
    },
}

impl<T: ?Sized> Slot<T> {
    /// Slot for an instrument that was not configured or could not connect.
    pub fn absent(reason: impl Into<String>) -> Self {
        Slot::Absent {
            reason: reason.into(),
        }
    }

    /// The instrument, if it can be used for polling.
    pub fn usable(&self) -> Option<&T> {
        match self {
            Slot::Present(device) => Some(device.as_ref()),
            _ => None,
        }
    }

    /// The instrument handle for release, whether present or degraded.
    pub fn handle(&self) -> Option<&T> {
        match self {
            Slot::Present(device) | Slot::Degraded { device, .. } => Some(device.as_ref()),
            Slot::Absent { .. } => None,
        }
    }

    /// Whether the instrument is present and usable.
    pub fn is_present(&self) -> bool {
        matches!(self, Slot::Present(_))
    }

    /// Mark the instrument as unusable for the rest of the session.
    ///
    /// Has no effect on slots that are already degraded or absent.
    pub fn degrade(&mut self, reason: impl Into<String>) {
        let current = std::mem::replace(self, Slot::absent(""));
        *self = match current {
            Slot::Present(device) => Slot::Degraded {
                device,
                reason: reason.into(),
            },
            other => other,
        };
    }

    /// Short status for logs.
    pub fn status(&self) -> String {
        match self {
            Slot::Present(_) => "present".to_string(),
            Slot::Degraded { reason, .. } => format!("degraded ({})", reason),
            Slot::Absent { reason } => format!("absent ({})", reason),
        }
    }
}

/// Both roles, each present or absent independently.
pub struct InstrumentSet {
    /// Meter role
    pub meter: Slot<dyn Meter>,
    /// Load role
    pub load: Slot<dyn Load>,
}

impl InstrumentSet {
    /// A set with no instruments.
    pub fn empty() -> Self {
        Self {
            meter: Slot::absent("not configured"),
            load: Slot::absent("not configured"),
        }
    }

    /// Assemble a set from already-constructed instruments.
    pub fn new(meter: Option<Box<dyn Meter>>, load: Option<Box<dyn Load>>) -> Self {
        Self {
            meter: meter.map_or_else(|| Slot::absent("not configured"), Slot::Present),
            load: load.map_or_else(|| Slot::absent("not configured"), Slot::Present),
        }
    }

    /// Connect to every enabled instrument.
    ///
    /// A failed connection leaves that role absent; it never fails the set.
    pub async fn connect(settings: &Settings) -> Self {
        let meter = match connect_meter(&settings.meter).await {
            Ok(Some(meter)) => Slot::Present(meter),
            Ok(None) => Slot::absent("disabled in configuration"),
            Err(err) => {
                tracing::warn!(role = %InstrumentRole::Meter, error = %err, "Meter not found");
                Slot::absent(err.to_string())
            }
        };
        let load = match connect_load(&settings.load).await {
            Ok(Some(load)) => Slot::Present(load),
            Ok(None) => Slot::absent("disabled in configuration"),
            Err(err) => {
                tracing::warn!(role = %InstrumentRole::Load, error = %err, "Load not found");
                Slot::absent(err.to_string())
            }
        };

        let set = Self { meter, load };
        if !set.any_present() {
            tracing::warn!("No instruments found; correlated records will carry -1 readings");
        }
        set
    }

    /// Whether at least one role can be polled.
    pub fn any_present(&self) -> bool {
        self.meter.is_present() || self.load.is_present()
    }

    /// Degrade the role an error came from if the error lost its connection.
    pub fn note_failure(&mut self, role: InstrumentRole, err: &InstrumentError) {
        if !err.is_connection_lost() {
            return;
        }
        tracing::error!(
            %role,
            error = %err,
            "Instrument connection lost; readings unavailable for the rest of the session"
        );
        match role {
            InstrumentRole::Meter => self.meter.degrade(err.to_string()),
            InstrumentRole::Load => self.load.degrade(err.to_string()),
        }
    }
}

async fn connect_meter(profile: &MeterSettings) -> Result<Option<Box<dyn Meter>>, InstrumentError> {
    if !profile.enabled {
        return Ok(None);
    }
    let endpoint = &profile.endpoint;
    let client = TcpScpiClient::connect(
        InstrumentRole::Meter,
        &endpoint.host,
        endpoint.port,
        endpoint.timeout,
    )
    .await?;
    Ok(Some(Box::new(Daq6510::new(client, profile))))
}

async fn connect_load(profile: &LoadSettings) -> Result<Option<Box<dyn Load>>, InstrumentError> {
    if !profile.enabled {
        return Ok(None);
    }
    let endpoint = &profile.endpoint;
    let client = TcpScpiClient::connect(
        InstrumentRole::Load,
        &endpoint.host,
        endpoint.port,
        endpoint.timeout,
    )
    .await?;
    Ok(Some(Box::new(Ngl201::new(client))))
}
