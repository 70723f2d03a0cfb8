use async_trait::async_trait;
use badger_core::schema::{flatten_defaults, merge_view};
use badger_core::{
    channel_key, AgentCommand, ConfigUpdateOutcome, DispatchQueue, ProvisionError, Provisioner,
    SubscriptionId,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use jsonschema::Validator;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

// ============================================================================
// Valheim Provisioner
// ============================================================================

/// Registry key for this provisioner.
pub const GAME_NAME: &str = "valheim";

/// Valheim binds a game port and the query port right above it.
const REQUIRED_PORTS: [u16; 2] = [2456, 2457];

/// Bytes of entropy in a generated server password.
const PASSWORD_BYTES: usize = 4;

/// Form fields rendered as checkboxes; browsers omit unchecked ones.
const CHECKBOX_FIELDS: [&str; 5] = [
    "nobuildcost",
    "passivemobs",
    "playerevents",
    "nomap",
    "crossplay",
];

/// Provisions Valheim dedicated servers.
///
/// See the dedicated server guide for the meaning of each option:
/// https://www.valheimgame.com/support/a-guide-to-dedicated-servers/
///
/// The schema is compiled once in [`ValheimProvisioner::new`]; clones share
/// the compiled validator.
#[derive(Clone)]
pub struct ValheimProvisioner {
    schema: Arc<Value>,
    validator: Arc<Validator>,
}

impl ValheimProvisioner {
    pub fn new() -> Result<Self, ProvisionError> {
        let schema = valheim_schema();
        let validator = jsonschema::draft7::new(&schema).map_err(|e| {
            ProvisionError::InvalidConfig(format!("{GAME_NAME} schema does not compile: {e}"))
        })?;
        Ok(Self {
            schema: Arc::new(schema),
            validator: Arc::new(validator),
        })
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    fn generate_password() -> String {
        let mut bytes = [0u8; PASSWORD_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

#[async_trait]
impl Provisioner for ValheimProvisioner {
    fn name(&self) -> &str {
        GAME_NAME
    }

    fn default_config(&self) -> Result<String, ProvisionError> {
        let mut values = flatten_defaults(&self.schema);
        values.insert("password".to_string(), json!(Self::generate_password()));

        let values = Value::Object(values);
        if !self.validate_config(&values) {
            return Err(ProvisionError::InvalidConfig(GAME_NAME.to_string()));
        }
        Ok(serde_json::to_string(&values)?)
    }

    fn required_ports(&self) -> Vec<u16> {
        REQUIRED_PORTS.to_vec()
    }

    fn validate_config(&self, values: &Value) -> bool {
        match self.validator.iter_errors(values).next() {
            None => true,
            Some(error) => {
                warn!("Valheim config validation failed: {}", error);
                false
            }
        }
    }

    fn generate_config_view_schema(&self, saved: &Map<String, Value>) -> Value {
        merge_view(&self.schema, saved)
    }

    async fn dispatch_config_update(
        &self,
        dispatch: &dyn DispatchQueue,
        host_ip: &str,
        game_name: &str,
        subscription_id: SubscriptionId,
        values: &Value,
    ) -> Result<ConfigUpdateOutcome, ProvisionError> {
        if !self.validate_config(values) {
            warn!(
                subscription_id = %subscription_id,
                "Skipping config update with invalid values"
            );
            return Ok(ConfigUpdateOutcome::Rejected);
        }

        let command = AgentCommand::UpdateConfig {
            subscription_id,
            game_name: game_name.to_string(),
            config: values.clone(),
        };
        dispatch
            .append(&channel_key(host_ip), command.to_string())
            .await?;

        info!(
            subscription_id = %subscription_id,
            host = %host_ip,
            "Queued Valheim config update"
        );
        Ok(ConfigUpdateOutcome::Dispatched)
    }

    fn normalize_form(&self, mut values: Map<String, Value>) -> Map<String, Value> {
        for key in CHECKBOX_FIELDS {
            let checked = match values.get(key) {
                Some(Value::Bool(b)) => *b,
                Some(Value::String(s)) => s == "on",
                _ => false,
            };
            values.insert(key.to_string(), Value::Bool(checked));
        }
        values
    }
}

// ============================================================================
// Schema
// ============================================================================

fn valheim_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "$id": "https://example.com/schemas/valheim.json",
        "title": "Valheim Server Config",
        "description": "Configuration schema for spinning up a Valheim dedicated server.",
        "type": "object",
        "properties": {
            "name": {
                "type": "string",
                "minLength": 1,
                "description": "The display name for your server (-name)",
                "default": "My server"
            },
            "world": {
                "type": "string",
                "minLength": 1,
                "description": "Name of the world to load or create (-world)",
                "default": "Dedicated"
            },
            "password": {
                "type": "string",
                "minLength": 0,
                "description": "Optional password, blank for none (-password)",
                "default": ""
            },
            "savedir": {
                "type": "string",
                "description": "Where worlds and permission files are stored (-savedir)",
                "default": "./valheim_saves"
            },
            "public": {
                "type": "integer",
                "enum": [0, 1],
                "description": "0 = private, 1 = listed on Steam (-public)",
                "default": 1
            },
            "logFile": {
                "type": "string",
                "description": "File to write server logs to (-logFile)",
                "default": "./valheim.log"
            },
            "saveinterval": {
                "type": "integer",
                "minimum": 60,
                "description": "Seconds between world saves (-saveinterval)",
                "default": 1800
            },
            "backups": {
                "type": "integer",
                "minimum": 1,
                "description": "Automatic backups to keep (-backups)",
                "default": 4
            },
            "backupshort": {
                "type": "integer",
                "minimum": 1,
                "description": "Seconds until the first automatic backup (-backupshort)",
                "default": 7200
            },
            "backuplong": {
                "type": "integer",
                "minimum": 1,
                "description": "Seconds between later automatic backups (-backuplong)",
                "default": 43200
            },
            "crossplay": {
                "type": "boolean",
                "description": "Enable the crossplay backend (-crossplay)",
                "default": false
            },
            "instanceid": {
                "type": "integer",
                "minimum": 1,
                "description": "Distinguishes servers sharing an IP and port (-instanceid)",
                "default": 1
            },
            "preset": {
                "type": "string",
                "enum": ["Normal", "Casual", "Easy", "Hard", "Hardcore", "Immersive", "Hammer"],
                "description": "World modifier preset; overrides individual modifiers (-preset)",
                "default": "Normal"
            },
            "modifiers": {
                "type": "object",
                "properties": {
                    "Combat": {
                        "type": "string",
                        "enum": ["veryeasy", "easy", "hard", "veryhard"],
                        "default": "easy"
                    },
                    "DeathPenalty": {
                        "type": "string",
                        "enum": ["casual", "veryeasy", "easy", "hard", "hardcore"],
                        "default": "easy"
                    },
                    "Resources": {
                        "type": "string",
                        "enum": ["muchless", "less", "more", "muchmore", "most"],
                        "default": "less"
                    },
                    "Raids": {
                        "type": "string",
                        "enum": ["none", "muchless", "less", "more", "muchmore"],
                        "default": "less"
                    },
                    "Portals": {
                        "type": "string",
                        "enum": ["casual", "hard", "veryhard"],
                        "default": "casual"
                    }
                }
            },
            "nomap": {
                "type": "boolean",
                "description": "Disable the map (setkey nomap)",
                "default": false
            },
            "playerevents": {
                "type": "boolean",
                "description": "Enable player events (setkey playerevents)",
                "default": false
            },
            "passivemobs": {
                "type": "boolean",
                "description": "Enable passive mobs (setkey passivemobs)",
                "default": false
            },
            "nobuildcost": {
                "type": "boolean",
                "description": "Disable build costs (setkey nobuildcost)",
                "default": false
            }
        },
        "required": ["name", "world"]
    })
}

// ============================================================================
// Tests
// ============================================================================
