//! `/receive`: record an incoming ingredient delivery at the warehouse.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::channels::{Choice, Prompt};
use crate::error::WorkflowError;
use crate::scenes::common::{self, CONFIRM};
use crate::scenes::{WorkflowData, WorkflowId};
use crate::store::model::{CatalogKind, NewStockReceipt, Role};
use crate::workflow::context::WorkflowContext;
use crate::workflow::definition::{
    Accept, CANCEL, Input, SKIP, StateSpec, Workflow, WorkflowDefinition,
};
use crate::workflow::event::MediaKind;
use crate::workflow::multiselect::{DONE, MultiSelect};
use crate::workflow::state::{StateName, workflow_states};
use crate::workflow::transition::{Params, Transition};

workflow_states! {
    pub enum State {
        SelectItems => "select_items",
        ItemAmounts => "item_amounts",
        Invoice => "invoice",
        Confirm => "confirm",
    }
}

static DEFINITION: WorkflowDefinition = WorkflowDefinition {
    id: WorkflowId::ReceiveStock,
    command: "receive",
    title: "Receive stock",
    roles: &[Role::Admin, Role::Warehouse],
    initial: "select_items",
    states: &[
        StateSpec {
            name: "select_items",
            accepts: &[Accept::Action(DONE), Accept::Entity("ing"), Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "item_amounts",
            accepts: &[Accept::Text, Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "invoice",
            accepts: &[Accept::Media, Accept::Command(SKIP), Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "confirm",
            accepts: &[Accept::Action(CONFIRM), Accept::Command(CANCEL)],
        },
    ],
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveData {
    pub ingredients: MultiSelect,
    /// Reference of the uploaded invoice photo or document.
    pub invoice: Option<String>,
}

impl Default for ReceiveData {
    fn default() -> Self {
        Self {
            ingredients: MultiSelect::new(CatalogKind::Ingredient),
            invoice: None,
        }
    }
}

pub struct ReceiveStock;

#[async_trait]
impl Workflow for ReceiveStock {
    fn definition(&self) -> &'static WorkflowDefinition {
        &DEFINITION
    }

    async fn init(
        &self,
        _ctx: &WorkflowContext<'_>,
        _params: Params,
    ) -> Result<WorkflowData, WorkflowError> {
        Ok(WorkflowData::ReceiveStock(ReceiveData::default()))
    }

    async fn render(
        &self,
        ctx: &WorkflowContext<'_>,
        state: &StateName,
        data: &WorkflowData,
    ) -> Result<(), WorkflowError> {
        let d = data.receive_stock()?;
        let prompt = match State::of(DEFINITION.id, state)? {
            State::SelectItems => {
                common::select_prompt(ctx, &d.ingredients, "📥 Received ingredients").await?
            }
            State::ItemAmounts => d.ingredients.detail_prompt(false),
            State::Invoice => Prompt::new("🧾 Send a photo or file of the invoice, or skip.")
                .row(vec![Choice::skip(), Choice::cancel()]),
            State::Confirm => Prompt::new(format!(
                "📥 Stock receipt\n\n{}\n\nInvoice: {}",
                d.ingredients.summary(),
                if d.invoice.is_some() { "attached" } else { "none" }
            ))
            .row(common::confirm_row()),
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
        let d = data.receive_stock_mut()?;
        let state = State::of(DEFINITION.id, state)?;
        let outcome = match state {
            State::SelectItems => d.ingredients.on_select(ctx, &input).await?,
            State::ItemAmounts => d.ingredients.on_detail(&input, None),
            State::Invoice => {
                d.invoice = match input {
                    Input::Media {
                        kind: MediaKind::Photo | MediaKind::Document,
                        reference,
                    } => Some(reference),
                    Input::Media { .. } => {
                        return Ok(Transition::retry("Please send a photo or a document."));
                    }
                    _ => None,
                };
                return Ok(Transition::goto(State::Confirm));
            }
            State::Confirm => return confirm(ctx, d).await,
        };
        Ok(match outcome {
            Some(outcome) => common::collect_transition(
                outcome,
                State::SelectItems,
                State::ItemAmounts,
                State::Invoice,
            ),
            None => Transition::Stay,
        })
    }
}

async fn confirm(ctx: &WorkflowContext<'_>, d: &ReceiveData) -> Result<Transition, WorkflowError> {
    if d.ingredients.is_empty() {
        return Ok(Transition::back(
            State::SelectItems,
            "Select at least one received item.",
        ));
    }
    let receipt = ctx
        .repo
        .create_stock_receipt(NewStockReceipt {
            received_by: ctx.actor.account()?,
            lines: d.ingredients.lines(),
            invoice: d.invoice.clone(),
        })
        .await?;
    tracing::info!(receipt_id = receipt.id, lines = receipt.lines.len(), "Stock received");
    ctx.notice(&format!(
        "✅ Receipt #{} saved ({} items).",
        receipt.id,
        receipt.lines.len()
    ))
    .await?;
    Ok(Transition::finish())
}
