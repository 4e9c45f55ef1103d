use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::limits::MAX_STAFF_ID_LEN;

/// One shared desk password. The login user name is kept as staff attribution,
/// so it must be present and fit on a booking.
#[derive(Debug)]
pub struct DeskbookAuthSource {
    password: String,
}

impl DeskbookAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for DeskbookAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().map(|u| u.to_string());
        check_staff(user.as_deref())?;
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

fn check_staff(user: Option<&str>) -> PgWireResult<()> {
    match user.map(str::trim) {
        Some(u) if !u.is_empty() && u.len() <= MAX_STAFF_ID_LEN => Ok(()),
        _ => Err(PgWireError::UserError(Box::new(ErrorInfo::new(
            "FATAL".into(),
            "28000".into(),
            "a staff user name is required".into(),
        )))),
    }
}
