//! Agent cards for the agents this workspace serves

use std::collections::BTreeMap;

use crate::protocol::{
    AgentCapabilities, AgentCard, AgentSkill, AuthorizationCodeFlow, GOOGLE_SCHEME, OAuthFlows,
    PROTOCOL_VERSION, SecurityScheme,
};

pub const CALENDAR_AGENT_NAME: &str = "Calendar Agent";
pub const QUOTE_AGENT_NAME: &str = "Quote Agent";

const CARD_VERSION: &str = "1.0.0";

/// Scope descriptions shown to the user on the consent page
fn scope_description(scope: &str) -> String {
    match scope {
        "https://www.googleapis.com/auth/calendar" => "See, edit and delete Google Calendar".to_string(),
        "https://www.googleapis.com/auth/calendar.events" => {
            "View and edit events on all your calendars".to_string()
        }
        other => other.to_string(),
    }
}

fn text_card(name: &str, description: &str, host: &str, port: u16, skill: AgentSkill) -> AgentCard {
    AgentCard {
        name: name.to_string(),
        description: description.to_string(),
        url: format!("http://{}:{}/", host, port),
        version: CARD_VERSION.to_string(),
        protocol_version: PROTOCOL_VERSION.to_string(),
        default_input_modes: vec!["text".to_string()],
        default_output_modes: vec!["text".to_string()],
        capabilities: AgentCapabilities {
            streaming: Some(true),
            push_notifications: None,
        },
        skills: vec![skill],
        security_schemes: BTreeMap::new(),
        security: Vec::new(),
    }
}

/// Calendar agent card. Declares the Google OAuth2 authorization-code flow
/// so callers know how to obtain a token with `scopes`.
pub fn calendar_card(
    host: &str,
    port: u16,
    auth_uri: &str,
    token_uri: &str,
    scopes: &[String],
) -> AgentCard {
    let skill = AgentSkill {
        id: "calendar_events_retrieval".to_string(),
        name: "Calendar events retrieval".to_string(),
        description: "Helps with calendar events retrieval".to_string(),
        tags: vec!["calendar".to_string()],
        examples: vec!["Any events tomorrow?".to_string()],
    };
    let mut card = text_card(
        CALENDAR_AGENT_NAME,
        "Helps with calendar events",
        host,
        port,
        skill,
    );

    let scopes: BTreeMap<String, String> = scopes
        .iter()
        .map(|s| (s.clone(), scope_description(s)))
        .collect();
    card.security = vec![BTreeMap::from([(
        GOOGLE_SCHEME.to_string(),
        scopes.keys().cloned().collect(),
    )])];
    card.security_schemes.insert(
        GOOGLE_SCHEME.to_string(),
        SecurityScheme::OAuth2 {
            flows: OAuthFlows {
                authorization_code: Some(AuthorizationCodeFlow {
                    authorization_url: auth_uri.to_string(),
                    token_url: token_uri.to_string(),
                    refresh_url: None,
                    scopes,
                }),
                client_credentials: None,
            },
            description: Some("Google account access to your calendar".to_string()),
        },
    );
    card
}

/// Quote agent card; open, no security scheme
pub fn quote_card(host: &str, port: u16) -> AgentCard {
    let skill = AgentSkill {
        id: "einstein_quote".to_string(),
        name: "Einstein quote".to_string(),
        description: "Returns a famous quote from Albert Einstein".to_string(),
        tags: vec!["quote".to_string(), "einstein".to_string()],
        examples: vec!["Give me a quote".to_string()],
    };
    text_card(
        QUOTE_AGENT_NAME,
        "An agent that can help questions about getting a quote from Einstein",
        host,
        port,
        skill,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALENDAR: &str = "https://www.googleapis.com/auth/calendar";

    #[test]
    fn test_calendar_card_wire_shape() {
        let card = calendar_card(
            "localhost",
            10004,
            "https://accounts.google.com/o/oauth2/auth",
            "https://oauth2.googleapis.com/token",
            &[CALENDAR.to_string()],
        );
        let json = serde_json::to_value(&card).unwrap();
        assert_eq!(json["url"], "http://localhost:10004/");
        assert_eq!(json["capabilities"]["streaming"], true);
        assert_eq!(json["skills"][0]["id"], "calendar_events_retrieval");
        let flow = &json["securitySchemes"]["google"]["flows"]["authorizationCode"];
        assert_eq!(json["securitySchemes"]["google"]["type"], "oauth2");
        assert_eq!(flow["tokenUrl"], "https://oauth2.googleapis.com/token");
        assert_eq!(flow["scopes"][CALENDAR], "See, edit and delete Google Calendar");
    }

    #[test]
    fn test_calendar_card_requires_auth() {
        let card = calendar_card("h", 1, "https://a", "https://t", &[CALENDAR.to_string()]);
        assert!(card.requires_auth());
        let flow = card.authorization_code_flow().unwrap();
        assert_eq!(flow.authorization_url, "https://a");
        assert!(flow.scopes.contains_key(CALENDAR));
    }

    #[test]
    fn test_quote_card_is_open() {
        let card = quote_card("localhost", 10003);
        assert!(!card.requires_auth());
        assert!(card.supports_streaming());
        let json = serde_json::to_value(&card).unwrap();
        assert!(json.get("securitySchemes").is_none());
    }
}
