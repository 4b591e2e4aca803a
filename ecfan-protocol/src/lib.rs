//! IPC wire protocol
//!
//! Requests and responses are single ASCII lines over a Unix stream
//! socket. A client sends one request (newline or EOF terminated, at most
//! [`MAX_FRAME`] bytes), reads one response line, and closes. The grammar
//! is deliberately tiny; anything the parser does not recognize becomes an
//! `ERROR:` reply and mutates nothing.

use std::fmt;

/// Maximum request frame size in bytes.
pub const MAX_FRAME: usize = 1024;

/// Fan duty bounds accepted over the wire.
pub const DUTY_MIN: u8 = 1;
pub const DUTY_MAX: u8 = 100;

/// Target temperature bounds accepted over the wire.
pub const TARGET_TEMP_MIN: u8 = 40;
pub const TARGET_TEMP_MAX: u8 = 100;

/// A parsed client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Full snapshot: temperatures, fan state, mode
    Status,
    /// Temperatures only
    GetTemp,
    /// Fan state only
    GetFan,
    /// Switch to manual mode at the given duty
    SetFan { duty: u8 },
    /// Return to automatic control
    SetAuto,
    /// Change the auto-mode setpoint
    SetTargetTemp { celsius: u8 },
}

impl Request {
    /// Parse one request line. The error string is the complete reply
    /// message for the client (already `ERROR:`-prefixed).
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or("");
        let arg = parts.next();

        match (command, arg) {
            ("STATUS", None) => Ok(Request::Status),
            ("GET_TEMP", None) => Ok(Request::GetTemp),
            ("GET_FAN", None) => Ok(Request::GetFan),
            ("SET_AUTO", None) => Ok(Request::SetAuto),
            ("SET_FAN", Some(value)) => match value.parse::<i64>() {
                Ok(n) if validate_duty(n) => Ok(Request::SetFan { duty: n as u8 }),
                Ok(_) => Err(format!(
                    "ERROR: Invalid duty cycle (must be {DUTY_MIN}-{DUTY_MAX})"
                )),
                Err(_) => Err("ERROR: Invalid SET_FAN command".to_string()),
            },
            ("SET_FAN", None) => Err("ERROR: Invalid SET_FAN command".to_string()),
            ("SET_TARGET_TEMP", Some(value)) => match value.parse::<i64>() {
                Ok(n) if validate_target_temp(n) => {
                    Ok(Request::SetTargetTemp { celsius: n as u8 })
                }
                Ok(_) => Err(format!(
                    "ERROR: Invalid target temperature (must be {TARGET_TEMP_MIN}-{TARGET_TEMP_MAX}°C)"
                )),
                Err(_) => Err("ERROR: Invalid SET_TARGET_TEMP command".to_string()),
            },
            ("SET_TARGET_TEMP", None) => {
                Err("ERROR: Invalid SET_TARGET_TEMP command".to_string())
            }
            _ => Err(format!("ERROR: Unknown command '{line}'")),
        }
    }
}

fn validate_duty(n: i64) -> bool {
    (DUTY_MIN as i64..=DUTY_MAX as i64).contains(&n)
}

fn validate_target_temp(n: i64) -> bool {
    (TARGET_TEMP_MIN as i64..=TARGET_TEMP_MAX as i64).contains(&n)
}

/// A server reply. `Display` renders the exact wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Status {
        cpu_temp: u8,
        gpu_temp: u8,
        fan_duty: u8,
        fan_rpm: u32,
        auto: bool,
    },
    Temps {
        cpu_temp: u8,
        gpu_temp: u8,
    },
    Fan {
        fan_duty: u8,
        fan_rpm: u32,
        auto: bool,
    },
    FanSet {
        duty: u8,
    },
    AutoEnabled,
    TargetTempSet {
        celsius: u8,
    },
    Error(String),
}

impl Response {
    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error(msg.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Status {
                cpu_temp,
                gpu_temp,
                fan_duty,
                fan_rpm,
                auto,
            } => write!(
                f,
                "CPU:{cpu_temp} GPU:{gpu_temp} FAN_DUTY:{fan_duty} FAN_RPM:{fan_rpm} AUTO:{}",
                *auto as u8
            ),
            Response::Temps { cpu_temp, gpu_temp } => {
                write!(f, "CPU:{cpu_temp} GPU:{gpu_temp}")
            }
            Response::Fan {
                fan_duty,
                fan_rpm,
                auto,
            } => write!(f, "DUTY:{fan_duty} RPM:{fan_rpm} AUTO:{}", *auto as u8),
            Response::FanSet { duty } => write!(f, "OK: Fan set to {duty}%"),
            Response::AutoEnabled => write!(f, "OK: Auto mode enabled"),
            Response::TargetTempSet { celsius } => {
                write!(f, "OK: Target temperature set to {celsius}°C")
            }
            Response::Error(msg) => {
                if msg.starts_with("ERROR:") {
                    write!(f, "{msg}")
                } else {
                    write!(f, "ERROR: {msg}")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_commands() {
        assert_eq!(Request::parse("STATUS"), Ok(Request::Status));
        assert_eq!(Request::parse("GET_TEMP"), Ok(Request::GetTemp));
        assert_eq!(Request::parse("GET_FAN"), Ok(Request::GetFan));
        assert_eq!(Request::parse("SET_AUTO"), Ok(Request::SetAuto));
    }

    #[test]
    fn test_parse_tolerates_line_endings() {
        assert_eq!(Request::parse("STATUS\n"), Ok(Request::Status));
        assert_eq!(Request::parse("  SET_AUTO \r\n"), Ok(Request::SetAuto));
    }

    #[test]
    fn test_parse_set_fan() {
        assert_eq!(Request::parse("SET_FAN 1"), Ok(Request::SetFan { duty: 1 }));
        assert_eq!(
            Request::parse("SET_FAN 100"),
            Ok(Request::SetFan { duty: 100 })
        );
    }

    #[test]
    fn test_set_fan_out_of_range() {
        for line in ["SET_FAN 0", "SET_FAN 101", "SET_FAN -3"] {
            let err = Request::parse(line).unwrap_err();
            assert_eq!(err, "ERROR: Invalid duty cycle (must be 1-100)");
        }
    }

    #[test]
    fn test_set_fan_malformed() {
        assert_eq!(
            Request::parse("SET_FAN"),
            Err("ERROR: Invalid SET_FAN command".to_string())
        );
        assert_eq!(
            Request::parse("SET_FAN fast"),
            Err("ERROR: Invalid SET_FAN command".to_string())
        );
    }

    #[test]
    fn test_parse_set_target_temp() {
        assert_eq!(
            Request::parse("SET_TARGET_TEMP 70"),
            Ok(Request::SetTargetTemp { celsius: 70 })
        );
    }

    #[test]
    fn test_set_target_temp_out_of_range() {
        let err = Request::parse("SET_TARGET_TEMP 200").unwrap_err();
        assert_eq!(err, "ERROR: Invalid target temperature (must be 40-100°C)");
        let err = Request::parse("SET_TARGET_TEMP 39").unwrap_err();
        assert_eq!(err, "ERROR: Invalid target temperature (must be 40-100°C)");
    }

    #[test]
    fn test_unknown_command() {
        let err = Request::parse("REBOOT now").unwrap_err();
        assert_eq!(err, "ERROR: Unknown command 'REBOOT now'");
        assert!(Request::parse("").is_err());
        // Trailing garbage on a bare command is not that command
        assert!(Request::parse("STATUS please").is_err());
    }

    #[test]
    fn test_response_wire_format() {
        let status = Response::Status {
            cpu_temp: 52,
            gpu_temp: 48,
            fan_duty: 35,
            fan_rpm: 2500,
            auto: true,
        };
        assert_eq!(
            status.to_string(),
            "CPU:52 GPU:48 FAN_DUTY:35 FAN_RPM:2500 AUTO:1"
        );

        assert_eq!(
            Response::Temps { cpu_temp: 52, gpu_temp: 48 }.to_string(),
            "CPU:52 GPU:48"
        );
        assert_eq!(
            Response::Fan { fan_duty: 80, fan_rpm: 4100, auto: false }.to_string(),
            "DUTY:80 RPM:4100 AUTO:0"
        );
        assert_eq!(Response::FanSet { duty: 80 }.to_string(), "OK: Fan set to 80%");
        assert_eq!(Response::AutoEnabled.to_string(), "OK: Auto mode enabled");
        assert_eq!(
            Response::TargetTempSet { celsius: 70 }.to_string(),
            "OK: Target temperature set to 70°C"
        );
    }

    #[test]
    fn test_error_prefix_not_doubled() {
        assert_eq!(
            Response::error("ERROR: Unknown command 'X'").to_string(),
            "ERROR: Unknown command 'X'"
        );
        assert_eq!(Response::error("boom").to_string(), "ERROR: boom");
    }
}
