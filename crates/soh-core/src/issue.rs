//! Acquired channel environment issue records.
//!
//! An issue is an interval-valued signal describing one aspect of a
//! channel's acquisition health (clipping, clock lock, power state, ...).
//! Boolean issues carry an on/off status and are subject to interval
//! merging; analog issues carry a measured value and pass through the
//! pipeline untouched.
//!
//! Identity for grouping and merging is the [`IssueKey`]: channel name plus
//! issue type. Two issues with the same key are merge candidates based on
//! temporal adjacency.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The kind of environment issue reported for a channel.
///
/// Covers the monitored acquisition conditions reported by digitizers and
/// station equipment. Boolean conditions toggle on/off over an interval;
/// the last three kinds are analog measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    /// Authentication seal on the equipment enclosure is broken.
    AuthenticationSealBroken,
    /// Backup power supply is unstable.
    BackupPowerUnstable,
    /// A calibration sequence is underway.
    CalibrationUnderway,
    /// Waveform samples are clipped.
    Clipped,
    /// Clock differential exceeds the configured limit.
    ClockDifferentialTooLarge,
    /// Digitizer clock is locked to GPS.
    ClockLocked,
    /// Sensor channel is not producing data.
    DeadSensorChannel,
    /// Digitizer analog input is shorted.
    DigitizerAnalogInputShorted,
    /// Digitizer is in calibration loop-back mode.
    DigitizerCalibrationLoopBack,
    /// Digitizing equipment enclosure is open.
    DigitizingEquipmentOpen,
    /// Equipment housing is open.
    EquipmentHousingOpen,
    /// Equipment has been moved.
    EquipmentMoved,
    /// GPS receiver is powered off.
    GpsReceiverOff,
    /// GPS receiver has lost satellite lock.
    GpsReceiverUnlocked,
    /// Main power has failed.
    MainPowerFailure,
    /// Vault door is open.
    VaultDoorOpened,
    /// Channel is producing zeroed data.
    ZeroedData,
    /// Measured clock differential, in microseconds (analog).
    ClockDifferentialInMicroseconds,
    /// Mean waveform amplitude over the interval (analog).
    MeanAmplitude,
    /// Accumulated outage duration over the interval (analog).
    DurationOutage,
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Display matches the wire form.
        let name = match self {
            Self::AuthenticationSealBroken => "AUTHENTICATION_SEAL_BROKEN",
            Self::BackupPowerUnstable => "BACKUP_POWER_UNSTABLE",
            Self::CalibrationUnderway => "CALIBRATION_UNDERWAY",
            Self::Clipped => "CLIPPED",
            Self::ClockDifferentialTooLarge => "CLOCK_DIFFERENTIAL_TOO_LARGE",
            Self::ClockLocked => "CLOCK_LOCKED",
            Self::DeadSensorChannel => "DEAD_SENSOR_CHANNEL",
            Self::DigitizerAnalogInputShorted => "DIGITIZER_ANALOG_INPUT_SHORTED",
            Self::DigitizerCalibrationLoopBack => "DIGITIZER_CALIBRATION_LOOP_BACK",
            Self::DigitizingEquipmentOpen => "DIGITIZING_EQUIPMENT_OPEN",
            Self::EquipmentHousingOpen => "EQUIPMENT_HOUSING_OPEN",
            Self::EquipmentMoved => "EQUIPMENT_MOVED",
            Self::GpsReceiverOff => "GPS_RECEIVER_OFF",
            Self::GpsReceiverUnlocked => "GPS_RECEIVER_UNLOCKED",
            Self::MainPowerFailure => "MAIN_POWER_FAILURE",
            Self::VaultDoorOpened => "VAULT_DOOR_OPENED",
            Self::ZeroedData => "ZEROED_DATA",
            Self::ClockDifferentialInMicroseconds => "CLOCK_DIFFERENTIAL_IN_MICROSECONDS",
            Self::MeanAmplitude => "MEAN_AMPLITUDE",
            Self::DurationOutage => "DURATION_OUTAGE",
        };
        f.write_str(name)
    }
}

/// Grouping identity for merge candidacy: channel plus issue type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueKey {
    /// Fully-qualified channel name (e.g. `ASAR.AS01.SHZ`).
    pub channel: String,
    /// The issue kind.
    pub issue_type: IssueType,
}

impl IssueKey {
    /// Creates a new key.
    #[must_use]
    pub fn new(channel: impl Into<String>, issue_type: IssueType) -> Self {
        Self {
            channel: channel.into(),
            issue_type,
        }
    }
}

impl fmt::Display for IssueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel, self.issue_type)
    }
}

/// A boolean channel environment issue over a closed time interval.
///
/// Boolean issues are the merge-bearing variant: adjacent or overlapping
/// records for the same key collapse into one canonical interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooleanIssue {
    /// Fully-qualified channel name.
    pub channel: String,
    /// The issue kind.
    pub issue_type: IssueType,
    /// Interval start, inclusive.
    pub start_time: DateTime<Utc>,
    /// Interval end.
    pub end_time: DateTime<Utc>,
    /// Whether the condition was present over the interval.
    pub status: bool,
}

impl BooleanIssue {
    /// Creates a new boolean issue, validating the interval.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInterval`] when `start_time` is after
    /// `end_time`.
    pub fn new(
        channel: impl Into<String>,
        issue_type: IssueType,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        status: bool,
    ) -> Result<Self> {
        let issue = Self {
            channel: channel.into(),
            issue_type,
            start_time,
            end_time,
            status,
        };
        issue.validate()?;
        Ok(issue)
    }

    /// Validates the interval ordering invariant.
    ///
    /// Useful after deserializing from an untrusted payload, which bypasses
    /// [`BooleanIssue::new`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInterval`] when `start_time` is after
    /// `end_time`.
    pub fn validate(&self) -> Result<()> {
        if self.start_time > self.end_time {
            return Err(Error::InvalidInterval {
                channel: self.channel.clone(),
                start: self.start_time.to_rfc3339(),
                end: self.end_time.to_rfc3339(),
            });
        }
        Ok(())
    }

    /// Returns the grouping key for this issue.
    #[must_use]
    pub fn key(&self) -> IssueKey {
        IssueKey::new(self.channel.clone(), self.issue_type)
    }

    /// Returns true when this issue's interval fully contains `other`'s.
    #[must_use]
    pub fn encloses(&self, other: &Self) -> bool {
        self.start_time <= other.start_time && self.end_time >= other.end_time
    }

    /// Returns the interval length.
    ///
    /// Saturates to zero on the (invalid) inverted case.
    #[must_use]
    pub fn duration(&self) -> Duration {
        (self.end_time - self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// An analog channel environment issue carrying a measured value.
///
/// Analog issues are never merged; the pipeline passes them through as
/// simple set unions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalogIssue {
    /// Fully-qualified channel name.
    pub channel: String,
    /// The issue kind.
    pub issue_type: IssueType,
    /// Interval start, inclusive.
    pub start_time: DateTime<Utc>,
    /// Interval end.
    pub end_time: DateTime<Utc>,
    /// The measured value over the interval.
    pub value: f64,
}

impl AnalogIssue {
    /// Creates a new analog issue, validating the interval.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInterval`] when `start_time` is after
    /// `end_time`.
    pub fn new(
        channel: impl Into<String>,
        issue_type: IssueType,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        value: f64,
    ) -> Result<Self> {
        let issue = Self {
            channel: channel.into(),
            issue_type,
            start_time,
            end_time,
            value,
        };
        if issue.start_time > issue.end_time {
            return Err(Error::InvalidInterval {
                channel: issue.channel,
                start: issue.start_time.to_rfc3339(),
                end: issue.end_time.to_rfc3339(),
            });
        }
        Ok(issue)
    }

    /// Returns the grouping key for this issue.
    #[must_use]
    pub fn key(&self) -> IssueKey {
        IssueKey::new(self.channel.clone(), self.issue_type)
    }
}

// Set semantics must hold for identical analog records, so equality and
// hashing use the value's bit pattern. NaN payloads compare by bits.
impl PartialEq for AnalogIssue {
    fn eq(&self, other: &Self) -> bool {
        self.channel == other.channel
            && self.issue_type == other.issue_type
            && self.start_time == other.start_time
            && self.end_time == other.end_time
            && self.value.to_bits() == other.value.to_bits()
    }
}

impl Eq for AnalogIssue {}

impl Hash for AnalogIssue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.channel.hash(state);
        self.issue_type.hash(state);
        self.start_time.hash(state);
        self.end_time.hash(state);
        self.value.to_bits().hash(state);
    }
}

/// A channel environment issue as delivered on the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Issue {
    /// Boolean (merge-bearing) variant.
    Boolean(BooleanIssue),
    /// Analog (pass-through) variant.
    Analog(AnalogIssue),
}

impl Issue {
    /// Returns the channel name of either variant.
    #[must_use]
    pub fn channel(&self) -> &str {
        match self {
            Self::Boolean(issue) => &issue.channel,
            Self::Analog(issue) => &issue.channel,
        }
    }

    /// Returns the grouping key of either variant.
    #[must_use]
    pub fn key(&self) -> IssueKey {
        match self {
            Self::Boolean(issue) => issue.key(),
            Self::Analog(issue) => issue.key(),
        }
    }

    /// Validates the interval ordering invariant of either variant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInterval`] when the record's start time is
    /// after its end time.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Boolean(issue) => issue.validate(),
            Self::Analog(issue) => {
                if issue.start_time > issue.end_time {
                    return Err(Error::InvalidInterval {
                        channel: issue.channel.clone(),
                        start: issue.start_time.to_rfc3339(),
                        end: issue.end_time.to_rfc3339(),
                    });
                }
                Ok(())
            }
        }
    }
}
