//! `/users`: grant and revoke roles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::channels::{Choice, Prompt};
use crate::error::WorkflowError;
use crate::scenes::common::{self, CONFIRM, STALE_NOTICE};
use crate::scenes::{WorkflowData, WorkflowId};
use crate::store::model::{Role, User};
use crate::workflow::context::WorkflowContext;
use crate::workflow::definition::{Accept, CANCEL, Input, StateSpec, Workflow, WorkflowDefinition};
use crate::workflow::multiselect::DONE;
use crate::workflow::state::{StateName, workflow_states};
use crate::workflow::transition::{Params, Transition};

const USER: &str = "user";

workflow_states! {
    pub enum State {
        ChooseUser => "choose_user",
        ChooseRoles => "choose_roles",
        Confirm => "confirm",
    }
}

static DEFINITION: WorkflowDefinition = WorkflowDefinition {
    id: WorkflowId::ManageUsers,
    command: "users",
    title: "Manage users",
    roles: &[Role::Admin],
    initial: "choose_user",
    states: &[
        StateSpec {
            name: "choose_user",
            accepts: &[Accept::Entity(USER), Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "choose_roles",
            accepts: &[
                Accept::Action("role:admin"),
                Accept::Action("role:manager"),
                Accept::Action("role:operator"),
                Accept::Action("role:warehouse"),
                Accept::Action(DONE),
                Accept::Command(CANCEL),
            ],
        },
        StateSpec {
            name: "confirm",
            accepts: &[Accept::Action(CONFIRM), Accept::Command(CANCEL)],
        },
    ],
};

fn role_token(role: Role) -> String {
    format!("role:{}", role.as_str())
}

fn role_from_token(token: &str) -> Option<Role> {
    let role: Role = token.strip_prefix("role:")?.parse().ok()?;
    Role::ASSIGNABLE.contains(&role).then_some(role)
}

fn describe_roles(roles: &[Role]) -> String {
    if roles.is_empty() {
        return "none".to_string();
    }
    roles
        .iter()
        .map(Role::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManageUsersData {
    pub user: Option<User>,
    /// Role set being edited, kept sorted.
    pub roles: Vec<Role>,
}

impl ManageUsersData {
    fn toggle(&mut self, role: Role) {
        match self.roles.iter().position(|r| *r == role) {
            Some(i) => {
                self.roles.remove(i);
            }
            None => {
                self.roles.push(role);
                self.roles.sort();
            }
        }
    }
}

pub struct ManageUsers;

#[async_trait]
impl Workflow for ManageUsers {
    fn definition(&self) -> &'static WorkflowDefinition {
        &DEFINITION
    }

    async fn init(
        &self,
        _ctx: &WorkflowContext<'_>,
        _params: Params,
    ) -> Result<WorkflowData, WorkflowError> {
        Ok(WorkflowData::ManageUsers(ManageUsersData::default()))
    }

    async fn render(
        &self,
        ctx: &WorkflowContext<'_>,
        state: &StateName,
        data: &WorkflowData,
    ) -> Result<(), WorkflowError> {
        let d = data.manage_users()?;
        let prompt = match State::of(DEFINITION.id, state)? {
            State::ChooseUser => {
                let users = ctx.repo.list_users(None).await?;
                let choices = users
                    .iter()
                    .map(|u| {
                        Choice::new(
                            format!("{} ({})", u.name, describe_roles(&u.roles)),
                            common::entity_token(USER, u.id),
                        )
                    })
                    .collect();
                Prompt::new("👥 Choose a user:")
                    .grid(choices, 1)
                    .choice(Choice::cancel())
            }
            State::ChooseRoles => {
                let name = d.user.as_ref().map_or("", |u| u.name.as_str());
                let choices = Role::ASSIGNABLE
                    .iter()
                    .map(|role| {
                        let mark = if d.roles.contains(role) { "✅" } else { "▫️" };
                        Choice::new(format!("{mark} {role}"), role_token(*role))
                    })
                    .collect();
                Prompt::new(format!("👤 Roles for {name}:"))
                    .grid(choices, 2)
                    .row(vec![Choice::new("➡️ Done", DONE), Choice::cancel()])
            }
            State::Confirm => {
                let (before, name) = d
                    .user
                    .as_ref()
                    .map(|u| (describe_roles(&u.roles), u.name.as_str()))
                    .unwrap_or_default();
                Prompt::new(format!(
                    "👤 {name}\n\nCurrent roles: {before}\nNew roles: {}",
                    describe_roles(&d.roles)
                ))
                .row(common::confirm_row())
            }
        };
        ctx.prompt(prompt).await
    }

    async fn handle(
        &self,
        ctx: &WorkflowContext<'_>,
        state: &StateName,
        data: &mut WorkflowData,
        input: Input,
    ) -> Result<Transition, WorkflowError> {
        let d = data.manage_users_mut()?;
        match State::of(DEFINITION.id, state)? {
            State::ChooseUser => {
                let Some(id) = input.entity(USER) else {
                    return Ok(Transition::Stay);
                };
                Ok(match ctx.repo.get_user(id).await? {
                    Some(user) => {
                        let mut roles = user.roles.clone();
                        roles.retain(|r| Role::ASSIGNABLE.contains(r));
                        roles.sort();
                        d.roles = roles;
                        d.user = Some(user);
                        Transition::goto(State::ChooseRoles)
                    }
                    None => Transition::back(State::ChooseUser, STALE_NOTICE),
                })
            }
            State::ChooseRoles => {
                if input.is_action(DONE) {
                    return Ok(Transition::goto(State::Confirm));
                }
                let Input::Action(token) = &input else {
                    return Ok(Transition::Stay);
                };
                let Some(role) = role_from_token(token) else {
                    return Ok(Transition::Stay);
                };
                d.toggle(role);
                if role == Role::Admin && is_self(ctx, d) && !d.roles.contains(&Role::Admin) {
                    return Ok(Transition::retry("You cannot remove your own admin role."));
                }
                Ok(Transition::Stay)
            }
            State::Confirm => confirm(ctx, d).await,
        }
    }
}

fn is_self(ctx: &WorkflowContext<'_>, d: &ManageUsersData) -> bool {
    d.user.as_ref().map(|u| u.id) == ctx.actor.account_id
}

async fn confirm(
    ctx: &WorkflowContext<'_>,
    d: &ManageUsersData,
) -> Result<Transition, WorkflowError> {
    let Some(user) = &d.user else {
        return Ok(Transition::back(State::ChooseUser, STALE_NOTICE));
    };
    if ctx.repo.get_user(user.id).await?.is_none() {
        return Ok(Transition::back(State::ChooseUser, STALE_NOTICE));
    }
    if is_self(ctx, d) && !d.roles.contains(&Role::Admin) {
        return Ok(Transition::back(
            State::ChooseRoles,
            "You cannot remove your own admin role.",
        ));
    }
    ctx.repo.update_user_roles(user.id, &d.roles).await?;
    tracing::info!(user_id = user.id, roles = %describe_roles(&d.roles), "Roles updated");
    ctx.notice(&format!("✅ Roles of {} updated.", user.name))
        .await?;
    ctx.notify(
        user,
        &format!("👤 Your roles are now: {}.", describe_roles(&d.roles)),
    )
    .await;
    Ok(Transition::finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_tokens_cover_assignable_roles_only() {
        for role in Role::ASSIGNABLE {
            assert_eq!(role_from_token(&role_token(role)), Some(role));
        }
        assert_eq!(role_from_token("role:guest"), None);
        assert_eq!(role_from_token("admin"), None);
    }

    #[test]
    fn toggle_keeps_roles_sorted() {
        let mut d = ManageUsersData::default();
        d.toggle(Role::Warehouse);
        d.toggle(Role::Admin);
        assert_eq!(d.roles, vec![Role::Admin, Role::Warehouse]);
        d.toggle(Role::Admin);
        assert_eq!(d.roles, vec![Role::Warehouse]);
    }

    #[test]
    fn every_role_choice_is_declared() {
        let spec = DEFINITION.state("choose_roles").unwrap();
        for role in Role::ASSIGNABLE {
            let token = role_token(role);
            assert!(
                spec.accepts
                    .iter()
                    .any(|a| matches!(a, Accept::Action(t) if *t == token))
            );
        }
    }
}
