//! JID helpers.
//!
//! A JID is `<user>@<server>`; individuals live on `s.whatsapp.net`, groups
//! on `g.us`. Callers hand us bare phone numbers or group ids and we add the
//! server part when it is missing.

/// Server for individual accounts.
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Server for groups.
pub const GROUP_SERVER: &str = "g.us";

/// Which canonical form a recipient should take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JidKind {
    User,
    Group,
}

impl JidKind {
    pub fn server(self) -> &'static str {
        match self {
            JidKind::User => USER_SERVER,
            JidKind::Group => GROUP_SERVER,
        }
    }
}

/// Turn a raw recipient token into a JID of the given kind.
///
/// If the token already contains `@<server>` it is returned as-is, otherwise
/// the suffix is appended once. The token itself is not validated.
pub fn normalize(raw: &str, kind: JidKind) -> String {
    let suffix = format!("@{}", kind.server());
    if raw.contains(&suffix) {
        raw.to_string()
    } else {
        format!("{}{}", raw, suffix)
    }
}

/// User part of a JID with any device suffix removed (`123:4@s...` → `123`).
pub fn user_part(jid: &str) -> &str {
    let user = jid.split('@').next().unwrap_or(jid);
    user.split(':').next().unwrap_or(user)
}
