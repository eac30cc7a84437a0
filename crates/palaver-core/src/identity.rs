use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three participant roles sharing one conversation space.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    User,
    Admin,
    Mentor,
}

impl ParticipantRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::Mentor => "mentor",
        }
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipantRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            "mentor" => Ok(Self::Mentor),
            other => Err(format!("unknown participant role: {other}")),
        }
    }
}

/// Durable identity of any actor in the system. The role plus numeric id
/// form the composite key used everywhere; connections come and go, the
/// identity does not.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ParticipantIdentity {
    pub role: ParticipantRole,
    pub id: i64,
}

impl ParticipantIdentity {
    pub fn new(role: ParticipantRole, id: i64) -> Self {
        Self { role, id }
    }

    /// The `"{role}_{id}"` composite key. This is the only place the key
    /// format is defined.
    pub fn key(&self) -> String {
        format!("{}_{}", self.role, self.id)
    }
}

impl fmt::Display for ParticipantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.role, self.id)
    }
}

impl FromStr for ParticipantIdentity {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (role, id) = s
            .rsplit_once('_')
            .ok_or_else(|| format!("malformed identity key: {s}"))?;
        Ok(Self {
            role: role.parse()?,
            id: id
                .parse()
                .map_err(|_| format!("malformed identity id in key: {s}"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        for role in [ParticipantRole::User, ParticipantRole::Admin, ParticipantRole::Mentor] {
            let parsed: ParticipantRole = role.as_str().parse().unwrap();
            assert_eq!(parsed, role);
        }
    }

    #[test]
    fn unknown_role_rejected() {
        assert!("moderator".parse::<ParticipantRole>().is_err());
    }

    #[test]
    fn key_format() {
        let id = ParticipantIdentity::new(ParticipantRole::User, 7);
        assert_eq!(id.key(), "user_7");
        assert_eq!(id.to_string(), "user_7");
    }

    #[test]
    fn key_round_trip() {
        let id = ParticipantIdentity::new(ParticipantRole::Mentor, 3);
        let parsed: ParticipantIdentity = id.key().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn malformed_keys_rejected() {
        assert!("user7".parse::<ParticipantIdentity>().is_err());
        assert!("user_x".parse::<ParticipantIdentity>().is_err());
        assert!("ghost_1".parse::<ParticipantIdentity>().is_err());
    }

    #[test]
    fn identity_is_a_map_key() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(ParticipantIdentity::new(ParticipantRole::User, 1));
        set.insert(ParticipantIdentity::new(ParticipantRole::User, 1));
        set.insert(ParticipantIdentity::new(ParticipantRole::Admin, 1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn role_serde_snake_case() {
        let json = serde_json::to_string(&ParticipantRole::Mentor).unwrap();
        assert_eq!(json, "\"mentor\"");
    }
}
