use crate::filter::FilterLevel;
use crate::output::OutputMode;
use thiserror::Error;

/// Typed result of interpreting one textual control command. Commands
/// arrive over the inbound messaging command topic or the console channel
/// as single-letter verbs with optional arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    SetFilter(FilterLevel),
    ReportFilter,
    SetMode(OutputMode),
    ReportMode,
    ReportVersion,
    RequestRestart,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command verb '{0}'")]
    UnknownVerb(char),
    #[error("invalid argument for '{verb}': {reason}")]
    InvalidArgument { verb: char, reason: String },
}

/// Parse one command line into a typed action.
///
/// - `S<level>` sets the output filter level (0..=3); bare `S` reports it.
/// - `J<hex>` sets the output mode bitmask; bare `J` reports it.
/// - `V` reports version and uptime.
/// - `K` requests a bridge restart.
pub fn parse(line: &str) -> Result<CommandAction, CommandError> {
    let line = line.trim();
    let mut chars = line.chars();
    let verb = chars.next().ok_or(CommandError::Empty)?;
    let argument = chars.as_str().trim();

    match verb.to_ascii_uppercase() {
        'S' => {
            if argument.is_empty() {
                return Ok(CommandAction::ReportFilter);
            }
            let level: u8 = argument.parse().map_err(|_| CommandError::InvalidArgument {
                verb: 'S',
                reason: format!("'{argument}' is not a filter level"),
            })?;
            let level = FilterLevel::from_u8(level).ok_or_else(|| CommandError::InvalidArgument {
                verb: 'S',
                reason: format!("level {level} out of range 0..=3"),
            })?;
            Ok(CommandAction::SetFilter(level))
        }
        'J' => {
            if argument.is_empty() {
                return Ok(CommandAction::ReportMode);
            }
            let digits = argument
                .strip_prefix("0x")
                .or_else(|| argument.strip_prefix("0X"))
                .unwrap_or(argument);
            let bits = u16::from_str_radix(digits, 16).map_err(|_| CommandError::InvalidArgument {
                verb: 'J',
                reason: format!("'{argument}' is not a hex bitmask"),
            })?;
            Ok(CommandAction::SetMode(OutputMode::from_bits(bits)))
        }
        'V' => Ok(CommandAction::ReportVersion),
        'K' => Ok(CommandAction::RequestRestart),
        other => Err(CommandError::UnknownVerb(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_filter_level() {
        assert_eq!(parse("S2"), Ok(CommandAction::SetFilter(FilterLevel::NoMeasurements)));
        assert_eq!(parse("s 0"), Ok(CommandAction::SetFilter(FilterLevel::All)));
        assert_eq!(parse("S"), Ok(CommandAction::ReportFilter));
    }

    #[test]
    fn test_filter_level_bounds() {
        assert!(matches!(
            parse("S4"),
            Err(CommandError::InvalidArgument { verb: 'S', .. })
        ));
        assert!(matches!(
            parse("Sx"),
            Err(CommandError::InvalidArgument { verb: 'S', .. })
        ));
    }

    #[test]
    fn test_set_output_mode() {
        assert_eq!(
            parse("J3803"),
            Ok(CommandAction::SetMode(OutputMode::from_bits(0x3803)))
        );
        assert_eq!(
            parse("j 0x0003"),
            Ok(CommandAction::SetMode(OutputMode::from_bits(0x0003)))
        );
        assert_eq!(parse("J"), Ok(CommandAction::ReportMode));
    }

    #[test]
    fn test_version_and_restart_verbs() {
        assert_eq!(parse("V"), Ok(CommandAction::ReportVersion));
        assert_eq!(parse("K"), Ok(CommandAction::RequestRestart));
    }

    #[test]
    fn test_rejects_unknown_and_empty() {
        assert_eq!(parse(""), Err(CommandError::Empty));
        assert_eq!(parse("  "), Err(CommandError::Empty));
        assert_eq!(parse("Q1"), Err(CommandError::UnknownVerb('Q')));
    }
}
