use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::parse_fields;
use crate::error::{FrameError, Result};

/// Auger rotation direction. Encoded as `0` or `1` on the wire; the firmware
/// rejects anything else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    pub fn code(self) -> u8 {
        match self {
            Self::Forward => 0,
            Self::Reverse => 1,
        }
    }
}

impl From<Direction> for u8 {
    fn from(direction: Direction) -> Self {
        direction.code()
    }
}

impl TryFrom<u8> for Direction {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Forward),
            1 => Ok(Self::Reverse),
            other => Err(FrameError::InvalidField {
                name: "direction",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Smoothing filter the firmware applies to scale samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterType {
    None,
    #[default]
    Ewma,
    Sma,
    Lpf,
}

impl FilterType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Ewma => "EWMA",
            Self::Sma => "SMA",
            Self::Lpf => "LPF",
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterType {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "EWMA" => Ok(Self::Ewma),
            "SMA" => Ok(Self::Sma),
            "LPF" => Ok(Self::Lpf),
            _ => Err(FrameError::InvalidField {
                name: "filter",
                value: s.to_string(),
            }),
        }
    }
}

/// A command understood by the rig firmware.
///
/// Built right before it is sent and consumed by the send.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Turn the auger by `steps` in `direction`.
    Dispense { steps: u32, direction: Direction },
    /// Energize the stepper driver.
    DispenserOn,
    /// Release the stepper driver.
    DispenserOff,
    /// Power the load cell amplifier.
    ScaleOn,
    /// Power down the load cell amplifier.
    ScaleOff,
    /// Zero the scale at the current load.
    Tare,
    /// Report the filtered raw ADC reading.
    Adc { samples: u32, filter: FilterType },
    /// Report the filtered weight in grams.
    Meas { samples: u32, filter: FilterType },
    /// Run the mixer relay.
    Mix { seconds: f64 },
    /// Run the drain relay.
    Drain { seconds: f64 },
    /// Run the pump wired to `pin`.
    Pump { pin: u8, seconds: f64 },
}

impl Command {
    /// The command name as sent on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dispense { .. } => "Dispense",
            Self::DispenserOn => "DispenserOn",
            Self::DispenserOff => "DispenserOff",
            Self::ScaleOn => "ScaleOn",
            Self::ScaleOff => "ScaleOff",
            Self::Tare => "Tare",
            Self::Adc { .. } => "ADC",
            Self::Meas { .. } => "Meas",
            Self::Mix { .. } => "Mix",
            Self::Drain { .. } => "Drain",
            Self::Pump { .. } => "Pump",
        }
    }

    /// The command parameters rendered as wire text.
    pub fn params(&self) -> Vec<String> {
        match self {
            Self::Dispense { steps, direction } => vec![steps.to_string(), direction.to_string()],
            Self::Adc { samples, filter } | Self::Meas { samples, filter } => {
                vec![samples.to_string(), filter.to_string()]
            }
            Self::Mix { seconds } | Self::Drain { seconds } => vec![seconds.to_string()],
            Self::Pump { pin, seconds } => vec![pin.to_string(), seconds.to_string()],
            Self::DispenserOn
            | Self::DispenserOff
            | Self::ScaleOn
            | Self::ScaleOff
            | Self::Tare => Vec::new(),
        }
    }

    /// How long the firmware blocks executing this command, if it is timed.
    pub fn run_time(&self) -> Option<Duration> {
        match self {
            Self::Mix { seconds } | Self::Drain { seconds } | Self::Pump { seconds, .. } => {
                Duration::try_from_secs_f64(*seconds).ok()
            }
            _ => None,
        }
    }

    /// Rebuild a typed command from a frame body.
    pub fn parse(body: &str) -> Result<Self> {
        let (name, params) = parse_fields(body);
        let command = match name {
            "Dispense" => {
                let [steps, direction] = fields::<2>(body, &params)?;
                let direction: u8 = number("direction", direction)?;
                Self::Dispense {
                    steps: number("steps", steps)?,
                    direction: Direction::try_from(direction)?,
                }
            }
            "DispenserOn" => unit(body, &params, Self::DispenserOn)?,
            "DispenserOff" => unit(body, &params, Self::DispenserOff)?,
            "ScaleOn" => unit(body, &params, Self::ScaleOn)?,
            "ScaleOff" => unit(body, &params, Self::ScaleOff)?,
            "Tare" => unit(body, &params, Self::Tare)?,
            "ADC" | "Meas" => {
                let [samples, filter] = fields::<2>(body, &params)?;
                let samples = number("samples", samples)?;
                let filter = filter.parse::<FilterType>()?;
                if name == "ADC" {
                    Self::Adc { samples, filter }
                } else {
                    Self::Meas { samples, filter }
                }
            }
            "Mix" => {
                let [seconds] = fields::<1>(body, &params)?;
                Self::Mix {
                    seconds: number("seconds", seconds)?,
                }
            }
            "Drain" => {
                let [seconds] = fields::<1>(body, &params)?;
                Self::Drain {
                    seconds: number("seconds", seconds)?,
                }
            }
            "Pump" => {
                let [pin, seconds] = fields::<2>(body, &params)?;
                Self::Pump {
                    pin: number("pin", pin)?,
                    seconds: number("seconds", seconds)?,
                }
            }
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.name())?;
        for param in self.params() {
            write!(f, ",{param}")?;
        }
        f.write_str(">")
    }
}

fn fields<'a, const N: usize>(body: &str, params: &[&'a str]) -> Result<[&'a str; N]> {
    <[&str; N]>::try_from(params).map_err(|_| FrameError::InvalidField {
        name: "parameter count",
        value: body.to_string(),
    })
}

fn unit(body: &str, params: &[&str], command: Command) -> Result<Command> {
    fields::<0>(body, params)?;
    Ok(command)
}

fn number<T: FromStr>(name: &'static str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| FrameError::InvalidField {
        name,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rebuilds_commands() {
        let commands = [
            Command::Dispense {
                steps: 250,
                direction: Direction::Forward,
            },
            Command::DispenserOff,
            Command::ScaleOn,
            Command::Adc {
                samples: 10,
                filter: FilterType::Sma,
            },
            Command::Meas {
                samples: 5,
                filter: FilterType::Lpf,
            },
            Command::Drain { seconds: 1.5 },
            Command::Pump {
                pin: 12,
                seconds: 3.0,
            },
        ];
        for command in commands {
            let wire = command.to_string();
            let body = &wire[1..wire.len() - 1];
            assert_eq!(Command::parse(body).unwrap(), command);
        }
    }

    #[test]
    fn parse_rejects_bad_direction() {
        let err = Command::parse("Dispense,10,2").unwrap_err();
        assert!(matches!(
            err,
            FrameError::InvalidField {
                name: "direction",
                ..
            }
        ));
    }

    #[test]
    fn parse_rejects_wrong_arity_and_unknown_names() {
        assert!(matches!(
            Command::parse("Tare,1"),
            Err(FrameError::InvalidField { .. })
        ));
        assert!(matches!(
            Command::parse("Mix"),
            Err(FrameError::InvalidField { .. })
        ));
        assert!(matches!(
            Command::parse("Explode,1"),
            Err(FrameError::UnknownCommand(name)) if name == "Explode"
        ));
    }

    #[test]
    fn filter_names() {
        assert_eq!("ewma".parse::<FilterType>().unwrap(), FilterType::Ewma);
        assert_eq!(" NONE ".parse::<FilterType>().unwrap(), FilterType::None);
        assert!("median".parse::<FilterType>().is_err());
        assert_eq!(FilterType::default(), FilterType::Ewma);
        assert_eq!(
            serde_json::to_string(&FilterType::Lpf).unwrap(),
            "\"LPF\""
        );
    }

    #[test]
    fn direction_serializes_as_wire_code() {
        assert_eq!(serde_json::to_string(&Direction::Reverse).unwrap(), "1");
        let parsed: Direction = serde_json::from_str("0").unwrap();
        assert_eq!(parsed, Direction::Forward);
        assert!(serde_json::from_str::<Direction>("2").is_err());
    }

    #[test]
    fn run_time_for_timed_commands() {
        assert_eq!(
            Command::Mix { seconds: 2.0 }.run_time(),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            Command::Pump {
                pin: 3,
                seconds: 0.5
            }
            .run_time(),
            Some(Duration::from_millis(500))
        );
        assert_eq!(Command::Drain { seconds: -1.0 }.run_time(), None);
        assert_eq!(Command::Tare.run_time(), None);
    }
}
