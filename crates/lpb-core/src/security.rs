use crate::domain::UserId;

// ============== Authorization ==============

/// Allow-list check, evaluated on every update.
///
/// An empty allow-list means open access.
pub fn is_authorized(user_id: Option<UserId>, allowed_users: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    if allowed_users.is_empty() {
        return true;
    }
    allowed_users.contains(&user_id.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_admits_everyone() {
        assert!(is_authorized(Some(UserId(1)), &[]));
        assert!(is_authorized(Some(UserId(-100123)), &[]));
    }

    #[test]
    fn non_empty_allow_list_admits_only_members() {
        let allowed = [10, 20];
        assert!(is_authorized(Some(UserId(10)), &allowed));
        assert!(is_authorized(Some(UserId(20)), &allowed));
        assert!(!is_authorized(Some(UserId(30)), &allowed));
    }

    #[test]
    fn anonymous_updates_are_denied() {
        assert!(!is_authorized(None, &[]));
        assert!(!is_authorized(None, &[10]));
    }
}
