//! `/bag`: the warehouse assembles a refill bag for one machine.
//!
//! The four catalogs are collected in sequence, one multi-select each.
//! Extras default to one piece each when the amount is skipped.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::channels::Prompt;
use crate::error::WorkflowError;
use crate::scenes::common::{self, CONFIRM, MACHINE, STALE_NOTICE};
use crate::scenes::{WorkflowData, WorkflowId};
use crate::store::model::{BagLine, CatalogKind, Machine, NewBag, Role};
use crate::workflow::context::WorkflowContext;
use crate::workflow::definition::{
    Accept, CANCEL, Input, SKIP, StateSpec, Workflow, WorkflowDefinition,
};
use crate::workflow::multiselect::{DONE, MultiSelect};
use crate::workflow::state::{StateName, workflow_states};
use crate::workflow::transition::{Params, Transition};

workflow_states! {
    pub enum State {
        ChooseMachine => "choose_machine",
        Ingredients => "ingredients",
        IngredientAmounts => "ingredient_amounts",
        Syrups => "syrups",
        SyrupAmounts => "syrup_amounts",
        Water => "water",
        WaterAmounts => "water_amounts",
        Extras => "extras",
        ExtraAmounts => "extra_amounts",
        Confirm => "confirm",
    }
}

static DEFINITION: WorkflowDefinition = WorkflowDefinition {
    id: WorkflowId::BagAssembly,
    command: "bag",
    title: "Assemble a bag",
    roles: &[Role::Admin, Role::Manager, Role::Warehouse],
    initial: "choose_machine",
    states: &[
        StateSpec {
            name: "choose_machine",
            accepts: &[Accept::Entity(MACHINE), Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "ingredients",
            accepts: &[Accept::Action(DONE), Accept::Entity("ing"), Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "ingredient_amounts",
            accepts: &[Accept::Text, Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "syrups",
            accepts: &[Accept::Action(DONE), Accept::Entity("syr"), Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "syrup_amounts",
            accepts: &[Accept::Text, Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "water",
            accepts: &[Accept::Action(DONE), Accept::Entity("wat"), Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "water_amounts",
            accepts: &[Accept::Text, Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "extras",
            accepts: &[Accept::Action(DONE), Accept::Entity("ext"), Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "extra_amounts",
            accepts: &[Accept::Text, Accept::Command(SKIP), Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "confirm",
            accepts: &[Accept::Action(CONFIRM), Accept::Command(CANCEL)],
        },
    ],
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BagData {
    pub machine: Option<Machine>,
    pub ingredients: MultiSelect,
    pub syrups: MultiSelect,
    pub water: MultiSelect,
    pub extras: MultiSelect,
}

impl Default for BagData {
    fn default() -> Self {
        Self {
            machine: None,
            ingredients: MultiSelect::new(CatalogKind::Ingredient),
            syrups: MultiSelect::new(CatalogKind::Syrup),
            water: MultiSelect::new(CatalogKind::Water),
            extras: MultiSelect::new(CatalogKind::Extra),
        }
    }
}

impl BagData {
    fn catalogs(&self) -> [&MultiSelect; 4] {
        [&self.ingredients, &self.syrups, &self.water, &self.extras]
    }

    pub fn lines(&self) -> Vec<BagLine> {
        self.catalogs()
            .into_iter()
            .flat_map(|ms| {
                ms.lines().into_iter().map(|l| BagLine {
                    kind: ms.kind,
                    item_id: l.item_id,
                    quantity: l.quantity,
                })
            })
            .collect()
    }

    fn summary(&self) -> String {
        let machine = self
            .machine
            .as_ref()
            .map(|m| m.label())
            .unwrap_or_default();
        let sections: Vec<String> = self
            .catalogs()
            .into_iter()
            .filter(|ms| !ms.is_empty())
            .map(|ms| format!("{}:\n{}", ms.kind, ms.summary()))
            .collect();
        let body = if sections.is_empty() {
            "The bag is empty.".to_string()
        } else {
            sections.join("\n\n")
        };
        format!("🎒 Bag for {machine}\n\n{body}")
    }
}

/// Select state, amount state, following state, and skip default per step.
struct Step {
    select: State,
    amounts: State,
    after: State,
    title: &'static str,
    default: Option<Decimal>,
}

fn step(state: State) -> Option<Step> {
    let step = match state {
        State::Ingredients | State::IngredientAmounts => Step {
            select: State::Ingredients,
            amounts: State::IngredientAmounts,
            after: State::Syrups,
            title: "🥛 Ingredients (weight in grams)",
            default: None,
        },
        State::Syrups | State::SyrupAmounts => Step {
            select: State::Syrups,
            amounts: State::SyrupAmounts,
            after: State::Water,
            title: "🍯 Syrups (count)",
            default: None,
        },
        State::Water | State::WaterAmounts => Step {
            select: State::Water,
            amounts: State::WaterAmounts,
            after: State::Extras,
            title: "💧 Water (bottles)",
            default: None,
        },
        State::Extras | State::ExtraAmounts => Step {
            select: State::Extras,
            amounts: State::ExtraAmounts,
            after: State::Confirm,
            title: "🥤 Extras: cups, lids, stirrers (count)",
            default: Some(Decimal::ONE),
        },
        State::ChooseMachine | State::Confirm => return None,
    };
    Some(step)
}

fn catalog(data: &BagData, state: State) -> Option<&MultiSelect> {
    match state {
        State::Ingredients | State::IngredientAmounts => Some(&data.ingredients),
        State::Syrups | State::SyrupAmounts => Some(&data.syrups),
        State::Water | State::WaterAmounts => Some(&data.water),
        State::Extras | State::ExtraAmounts => Some(&data.extras),
        State::ChooseMachine | State::Confirm => None,
    }
}

fn catalog_mut(data: &mut BagData, state: State) -> Option<&mut MultiSelect> {
    match state {
        State::Ingredients | State::IngredientAmounts => Some(&mut data.ingredients),
        State::Syrups | State::SyrupAmounts => Some(&mut data.syrups),
        State::Water | State::WaterAmounts => Some(&mut data.water),
        State::Extras | State::ExtraAmounts => Some(&mut data.extras),
        State::ChooseMachine | State::Confirm => None,
    }
}

pub struct BagAssembly;

#[async_trait]
impl Workflow for BagAssembly {
    fn definition(&self) -> &'static WorkflowDefinition {
        &DEFINITION
    }

    async fn init(
        &self,
        _ctx: &WorkflowContext<'_>,
        _params: Params,
    ) -> Result<WorkflowData, WorkflowError> {
        Ok(WorkflowData::BagAssembly(BagData::default()))
    }

    async fn render(
        &self,
        ctx: &WorkflowContext<'_>,
        state: &StateName,
        data: &WorkflowData,
    ) -> Result<(), WorkflowError> {
        let d = data.bag_assembly()?;
        let state = State::of(DEFINITION.id, state)?;
        let prompt = match (state, step(state)) {
            (State::ChooseMachine, _) => common::machine_prompt(ctx, "🎒 New bag").await?,
            (State::Confirm, _) => Prompt::new(d.summary()).row(common::confirm_row()),
            (current, Some(step)) => {
                let ms = catalog(d, current).ok_or_else(mismatch)?;
                if current == step.select {
                    common::select_prompt(ctx, ms, step.title).await?
                } else {
                    ms.detail_prompt(step.default.is_some())
                }
            }
            (_, None) => return Err(mismatch()),
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
        let d = data.bag_assembly_mut()?;
        let state = State::of(DEFINITION.id, state)?;
        match state {
            State::ChooseMachine => {
                let Some(id) = input.entity(MACHINE) else {
                    return Ok(Transition::Stay);
                };
                Ok(match common::load_machine(ctx, id).await? {
                    Some(machine) => {
                        d.machine = Some(machine);
                        Transition::goto(State::Ingredients)
                    }
                    None => Transition::back(State::ChooseMachine, STALE_NOTICE),
                })
            }
            State::Confirm => confirm(ctx, d).await,
            current => {
                let step = step(current).ok_or_else(mismatch)?;
                let ms = catalog_mut(d, current).ok_or_else(mismatch)?;
                let outcome = if current == step.select {
                    ms.on_select(ctx, &input).await?
                } else {
                    ms.on_detail(&input, step.default)
                };
                Ok(match outcome {
                    Some(outcome) => {
                        common::collect_transition(outcome, step.select, step.amounts, step.after)
                    }
                    None => Transition::Stay,
                })
            }
        }
    }
}

fn mismatch() -> WorkflowError {
    WorkflowError::DataMismatch {
        workflow: DEFINITION.id.to_string(),
    }
}

async fn confirm(ctx: &WorkflowContext<'_>, d: &BagData) -> Result<Transition, WorkflowError> {
    let Some(machine) = &d.machine else {
        return Ok(Transition::back(State::ChooseMachine, STALE_NOTICE));
    };
    let bag = ctx
        .repo
        .create_bag(NewBag {
            machine_id: machine.id,
            assembled_by: ctx.actor.account()?,
            lines: d.lines(),
        })
        .await?;
    tracing::info!(bag_id = bag.id, lines = bag.lines.len(), "Bag assembled");
    ctx.notice(&format!(
        "✅ Bag #{} for {} saved ({} lines).",
        bag.id,
        machine.label(),
        bag.lines.len()
    ))
    .await?;
    Ok(Transition::finish())
}
