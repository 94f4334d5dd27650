use crate::{jwt::SessionData, schema::UserRole};

const ACTION_TABLE: &[(UserRole, &[ActionType])] = &[
    (
        UserRole::User,
        &[
            ActionType::CreateRecipes,
            ActionType::ManageOwnRecipes,
            ActionType::ManageOwnMemberships,
        ],
    ),
    (
        UserRole::Admin,
        &[
            ActionType::CreateRecipes,
            ActionType::ManageOwnRecipes,
            ActionType::ManageOwnMemberships,
            ActionType::ManageAllRecipes,
        ],
    ),
];

#[derive(Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum ActionType {
    CreateRecipes,

    ManageOwnRecipes,
    ManageOwnMemberships,

    ManageAllRecipes,
}

impl ActionType {
    pub fn authenticate(self, session: &SessionData) -> bool {
        let role = &session.role;

        ACTION_TABLE
            .iter()
            .find_map(|(uid, actions)| {
                if role != uid {
                    return None;
                }

                Some(actions.contains(&self))
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(role: UserRole) -> SessionData {
        SessionData {
            user_id: 1,
            username: "someone".to_string(),
            is_admin: role == UserRole::Admin,
            role,
        }
    }

    #[test]
    fn only_admins_manage_all_recipes() {
        assert!(!ActionType::ManageAllRecipes.authenticate(&session(UserRole::User)));
        assert!(ActionType::ManageAllRecipes.authenticate(&session(UserRole::Admin)));
    }

    #[test]
    fn users_manage_their_own_content() {
        let user = session(UserRole::User);
        assert!(ActionType::CreateRecipes.authenticate(&user));
        assert!(ActionType::ManageOwnRecipes.authenticate(&user));
        assert!(ActionType::ManageOwnMemberships.authenticate(&user));
    }
}
