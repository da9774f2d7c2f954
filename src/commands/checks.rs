use crate::{
    database::models::{Actor, UserId},
    utils::error::CommonError,
};

/// Check if the actor has admin rights.
pub fn is_admin(actor: &Actor) -> Result<(), CommonError> {
    if actor.is_admin {
        return Ok(());
    }
    Err(CommonError::Unauthorized(actor.user_id.clone()))
}

/// Check if the actor is looking at their own account, or is an admin.
pub fn is_self_or_admin(actor: &Actor, user_id: &UserId) -> Result<(), CommonError> {
    if actor.user_id == *user_id {
        return Ok(());
    }
    is_admin(actor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn players_are_not_admins() {
        assert!(is_admin(&Actor::admin("root")).is_ok());
        assert!(matches!(
            is_admin(&Actor::player("alice")),
            Err(CommonError::Unauthorized(_))
        ));
    }

    #[test]
    fn players_can_only_see_themselves() {
        let alice = Actor::player("alice");
        assert!(is_self_or_admin(&alice, &UserId::from("alice")).is_ok());
        assert!(is_self_or_admin(&alice, &UserId::from("bob")).is_err());
        assert!(is_self_or_admin(&Actor::admin("root"), &UserId::from("bob")).is_ok());
    }
}
