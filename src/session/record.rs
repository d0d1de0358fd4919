use crate::container::{ContainerError, ContainerState, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Caller-chosen session identifier, stable across all verbs for one session
pub type SessionId = u32;

/// String-keyed session fields as carried on the wire
pub type SessionFields = BTreeMap<String, String>;

/// Field names of the wire form
pub mod keys {
    pub const USER_NAME: &str = "user_name";
    pub const USER_ID: &str = "user_id";
    pub const GROUP_ID: &str = "group_id";
    pub const OWNER_PID: &str = "pid";
    pub const HOME: &str = "host_user";
    pub const XDG_DATA_HOME: &str = "xdg_data_home";
    pub const RUNTIME_DIR: &str = "xdg_runtime_dir";
    pub const WAYLAND_DISPLAY: &str = "wayland_display";
    pub const PULSE_RUNTIME_PATH: &str = "pulse_runtime_path";
    pub const DATA_DIR: &str = "waydroid_data";
    pub const DENSITY: &str = "lcd_density";
    pub const BACKGROUND_START: &str = "background_start";
    pub const STATE: &str = "state";
    pub const CONTAINER_PID: &str = "container_pid";
}

/// One session's record.
///
/// Every field is optional so that the empty record (a placeholder created by
/// a session probe) round-trips as an empty field map. Unknown keys are kept
/// in `extra` and passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub user_name: Option<String>,
    pub user_id: Option<u32>,
    pub group_id: Option<u32>,
    /// Process that requested the session; only it may start it
    pub owner_pid: Option<u32>,
    pub home: Option<PathBuf>,
    pub xdg_data_home: Option<PathBuf>,
    pub runtime_dir: Option<PathBuf>,
    pub wayland_display: Option<String>,
    pub pulse_runtime_path: Option<PathBuf>,
    /// Host directory holding the session's Android data
    pub data_dir: Option<PathBuf>,
    pub density: Option<u32>,
    pub background_start: Option<bool>,
    /// Last state reported by the runtime
    pub state: Option<ContainerState>,
    /// Pid of the container init process
    pub container_pid: Option<u32>,
    pub extra: BTreeMap<String, String>,
}

impl Session {
    /// True for the empty record handed out by session probes.
    pub fn is_placeholder(&self) -> bool {
        *self == Session::default()
    }

    /// Parse the wire form.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::InvalidSession`] when a typed field does not parse.
    pub fn from_fields(fields: &SessionFields) -> Result<Self> {
        let mut session = Session::default();

        for (key, value) in fields {
            match key.as_str() {
                keys::USER_NAME => session.user_name = Some(value.clone()),
                keys::USER_ID => session.user_id = Some(parse_number(key, value)?),
                keys::GROUP_ID => session.group_id = Some(parse_number(key, value)?),
                keys::OWNER_PID => session.owner_pid = Some(parse_number(key, value)?),
                keys::HOME => session.home = Some(PathBuf::from(value)),
                keys::XDG_DATA_HOME => session.xdg_data_home = Some(PathBuf::from(value)),
                keys::RUNTIME_DIR => session.runtime_dir = Some(PathBuf::from(value)),
                keys::WAYLAND_DISPLAY => session.wayland_display = Some(value.clone()),
                keys::PULSE_RUNTIME_PATH => {
                    session.pulse_runtime_path = Some(PathBuf::from(value))
                }
                keys::DATA_DIR => session.data_dir = Some(PathBuf::from(value)),
                keys::DENSITY => session.density = Some(parse_number(key, value)?),
                keys::BACKGROUND_START => {
                    session.background_start = Some(match value.as_str() {
                        "true" => true,
                        "false" => false,
                        other => {
                            return Err(ContainerError::InvalidSession(format!(
                                "{} must be 'true' or 'false', got '{}'",
                                key, other
                            )));
                        }
                    })
                }
                keys::STATE => {
                    session.state = Some(
                        value
                            .parse()
                            .map_err(ContainerError::InvalidSession)?,
                    )
                }
                keys::CONTAINER_PID => session.container_pid = Some(parse_number(key, value)?),
                _ => {
                    session.extra.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(session)
    }

    /// Render the wire form, omitting unset fields.
    pub fn to_fields(&self) -> SessionFields {
        let mut fields = self.extra.clone();

        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                fields.insert(key.to_string(), value);
            }
        };

        put(keys::USER_NAME, self.user_name.clone());
        put(keys::USER_ID, self.user_id.map(|v| v.to_string()));
        put(keys::GROUP_ID, self.group_id.map(|v| v.to_string()));
        put(keys::OWNER_PID, self.owner_pid.map(|v| v.to_string()));
        put(keys::HOME, path_string(&self.home));
        put(keys::XDG_DATA_HOME, path_string(&self.xdg_data_home));
        put(keys::RUNTIME_DIR, path_string(&self.runtime_dir));
        put(keys::WAYLAND_DISPLAY, self.wayland_display.clone());
        put(keys::PULSE_RUNTIME_PATH, path_string(&self.pulse_runtime_path));
        put(keys::DATA_DIR, path_string(&self.data_dir));
        put(keys::DENSITY, self.density.map(|v| v.to_string()));
        put(keys::BACKGROUND_START, self.background_start.map(|v| v.to_string()));
        put(keys::STATE, self.state.map(|s| s.as_str().to_string()));
        put(keys::CONTAINER_PID, self.container_pid.map(|v| v.to_string()));

        fields
    }
}

fn parse_number(key: &str, value: &str) -> Result<u32> {
    value.trim().parse().map_err(|_| {
        ContainerError::InvalidSession(format!("{} must be a number, got '{}'", key, value))
    })
}

fn path_string(path: &Option<PathBuf>) -> Option<String> {
    path.as_ref().map(|p| p.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> SessionFields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_typed_fields() {
        let session = Session::from_fields(&fields(&[
            ("user_id", "1000"),
            ("pid", "555"),
            ("xdg_runtime_dir", "/run/user/1000"),
            ("wayland_display", "wayland-1"),
            ("lcd_density", "240"),
            ("background_start", "false"),
            ("state", "FROZEN"),
            ("custom_key", "kept"),
        ]))
        .unwrap();

        assert_eq!(session.user_id, Some(1000));
        assert_eq!(session.owner_pid, Some(555));
        assert_eq!(session.runtime_dir, Some(PathBuf::from("/run/user/1000")));
        assert_eq!(session.density, Some(240));
        assert_eq!(session.background_start, Some(false));
        assert_eq!(session.state, Some(ContainerState::Frozen));
        assert_eq!(session.extra.get("custom_key").map(String::as_str), Some("kept"));
    }

    #[test]
    fn test_rejects_malformed_numbers() {
        let result = Session::from_fields(&fields(&[("user_id", "root")]));
        assert!(matches!(result, Err(ContainerError::InvalidSession(_))));

        let result = Session::from_fields(&fields(&[("state", "PAUSED")]));
        assert!(matches!(result, Err(ContainerError::InvalidSession(_))));
    }

    #[test]
    fn test_placeholder_is_empty_on_the_wire() {
        let placeholder = Session::default();
        assert!(placeholder.is_placeholder());
        assert!(placeholder.to_fields().is_empty());
    }

    #[test]
    fn test_fields_survive_a_round_trip() {
        let original = fields(&[
            ("user_name", "alice"),
            ("user_id", "1000"),
            ("group_id", "1000"),
            ("pid", "42"),
            ("waydroid_data", "/home/alice/.local/share/waydroid/session_0/data"),
            ("container_pid", "777"),
            ("state", "RUNNING"),
        ]);
        let session = Session::from_fields(&original).unwrap();
        assert_eq!(session.to_fields(), original);
    }
}
