//! Inbound command parsing

use std::fmt;
use std::sync::Arc;

use crate::error::ParseError;
use crate::models::{Action, Target};
use crate::registry::DeviceRegistry;

/// A validated command. Only the parser constructs these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    target: Target,
    action: Action,
}

impl ParsedCommand {
    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn action(&self) -> Action {
        self.action
    }
}

/// Wire form, `<target>:<action>`
impl fmt::Display for ParsedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target, self.action)
    }
}

/// What an inbound feed payload turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Command(ParsedCommand),
    /// A JSON object, i.e. one of our own publications coming back
    Echo,
}

pub struct CommandParser {
    registry: Arc<DeviceRegistry>,
}

impl CommandParser {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Parse a raw feed payload
    pub fn parse(&self, raw: &str) -> Result<Inbound, ParseError> {
        let raw = raw.trim();

        if is_echo(raw) {
            return Ok(Inbound::Echo);
        }

        let (target, action) = raw
            .split_once(':')
            .ok_or_else(|| ParseError::MalformedMessage(raw.to_string()))?;

        self.parse_parts(target, action).map(Inbound::Command)
    }

    /// Resolve an already separated target and action
    pub fn parse_parts(&self, target: &str, action: &str) -> Result<ParsedCommand, ParseError> {
        let target = self.resolve_target(target)?;

        let action_token = action.trim().to_lowercase();
        let action = Action::from_token(&action_token).ok_or_else(|| ParseError::UnknownAction {
            target: target.to_string(),
            action: action.trim().to_string(),
        })?;

        Ok(ParsedCommand { target, action })
    }

    fn resolve_target(&self, target: &str) -> Result<Target, ParseError> {
        let token = target.trim().to_lowercase();
        if token == "all" {
            return Ok(Target::All);
        }

        self.registry
            .find(&token)
            .map(|entry| Target::Device(entry.key.clone()))
            .ok_or_else(|| ParseError::UnknownDevice {
                device: target.trim().to_string(),
                known: self.registry.keys(),
            })
    }
}

fn is_echo(raw: &str) -> bool {
    raw.starts_with('{')
        && serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(raw).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceEntry;

    fn parser() -> CommandParser {
        let registry = DeviceRegistry::new(vec![
            DeviceEntry::new("cactus", "eb06105cff43c50594rz5n", "Cactus"),
            DeviceEntry::new("ananas", "eb39191340ad46ad91wbug", "Ananas"),
            DeviceEntry::new("dino", "03310047840d8e87510e", "Dino"),
        ])
        .unwrap();
        CommandParser::new(Arc::new(registry))
    }

    fn command(inbound: Inbound) -> ParsedCommand {
        match inbound {
            Inbound::Command(cmd) => cmd,
            Inbound::Echo => panic!("expected a command"),
        }
    }

    #[test]
    fn test_parse_device_command() {
        let cmd = command(parser().parse("cactus:on").unwrap());
        assert_eq!(cmd.target(), &Target::Device("cactus".to_string()));
        assert_eq!(cmd.action(), Action::TurnOn);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let cmd = command(parser().parse("DINO:Status\n").unwrap());
        assert_eq!(cmd.target(), &Target::Device("dino".to_string()));
        assert_eq!(cmd.action(), Action::QueryStatus);

        let cmd = command(parser().parse("All:FALSE").unwrap());
        assert_eq!(cmd.target(), &Target::All);
        assert_eq!(cmd.action(), Action::TurnOff);
    }

    #[test]
    fn test_parse_synonyms() {
        let p = parser();
        assert_eq!(command(p.parse("ananas:1").unwrap()).action(), Action::TurnOn);
        assert_eq!(command(p.parse("ananas:true").unwrap()).action(), Action::TurnOn);
        assert_eq!(command(p.parse("ananas:0").unwrap()).action(), Action::TurnOff);
        assert_eq!(command(p.parse("ananas:false").unwrap()).action(), Action::TurnOff);
    }

    #[test]
    fn test_missing_colon_is_malformed() {
        assert_eq!(
            parser().parse("bogus_no_colon"),
            Err(ParseError::MalformedMessage("bogus_no_colon".to_string()))
        );
    }

    #[test]
    fn test_unknown_device_lists_keys() {
        assert_eq!(
            parser().parse("ghost:on"),
            Err(ParseError::UnknownDevice {
                device: "ghost".to_string(),
                known: vec!["cactus".into(), "ananas".into(), "dino".into()],
            })
        );
    }

    #[test]
    fn test_unknown_action() {
        assert_eq!(
            parser().parse("cactus:toggle"),
            Err(ParseError::UnknownAction {
                target: "cactus".to_string(),
                action: "toggle".to_string(),
            })
        );
        // Only the first colon separates target from action
        assert!(matches!(
            parser().parse("cactus:on:now"),
            Err(ParseError::UnknownAction { .. })
        ));
    }

    #[test]
    fn test_json_object_is_echo() {
        assert_eq!(parser().parse(r#"{"status":"connected"}"#), Ok(Inbound::Echo));
        assert_eq!(
            parser().parse(r#" {"device":"all","action":"on","result":{}} "#),
            Ok(Inbound::Echo)
        );
    }

    #[test]
    fn test_non_object_json_is_not_echo() {
        assert!(matches!(
            parser().parse("[1,2]"),
            Err(ParseError::MalformedMessage(_))
        ));
        assert!(matches!(
            parser().parse("{not json}"),
            Err(ParseError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_round_trip() {
        let p = parser();
        for target in ["all", "cactus", "ananas", "dino"] {
            for action in Action::ALL {
                let cmd = p.parse_parts(target, action.as_str()).unwrap();
                let reparsed = command(p.parse(&cmd.to_string()).unwrap());
                assert_eq!(reparsed, cmd);
            }
        }
    }
}
