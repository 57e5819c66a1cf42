//! Multi-select collection: toggle zero or more catalog items, then give
//! each selected item a quantity.
//!
//! One `MultiSelect` per catalog instantiation. Scenes own it inside their
//! data bag and drive it from two states: a select state and a detail state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::channels::{Choice, Prompt};
use crate::error::WorkflowError;
use crate::store::model::{CatalogItem, CatalogKind, EntityId, LineItem};
use crate::workflow::context::WorkflowContext;
use crate::workflow::definition::{Input, SKIP};

/// Token that closes the selection.
pub const DONE: &str = "done";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub item_id: EntityId,
    pub name: String,
    /// Zero until the detail step fills it in.
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiSelect {
    pub kind: CatalogKind,
    pub entries: Vec<Selection>,
    /// Entry awaiting its quantity.
    pub cursor: usize,
}

/// Where "done" leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterSelect {
    /// At least one item picked: collect quantities.
    Detail,
    /// Nothing picked: skip the detail step entirely.
    Skip,
}

/// Progress after a valid quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailStep {
    Next,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuantityError {
    #[error("Please send a number, e.g. 250 or 1.5")]
    NotANumber,
    #[error("The amount must be greater than zero")]
    NotPositive,
    #[error("All items already have an amount")]
    NothingPending,
}

/// Outcome of feeding an input to a collection state, mapped by scenes to
/// their own transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collect {
    /// Selection changed; re-render the select prompt in place.
    Toggled,
    /// The selected id no longer exists in the catalog.
    Stale,
    /// Selection closed with items: go to the detail state.
    Detail,
    /// Quantity stored; prompt for the next item.
    Next,
    /// Collection finished (empty selection, last quantity, or defaults applied).
    Done,
    /// Invalid quantity; re-prompt with this notice.
    Retry(String),
}

/// Parse a positive decimal. Accepts `250`, `1.5` and `1,5`.
pub fn parse_quantity(raw: &str) -> Result<Decimal, QuantityError> {
    let normalized = raw.trim().replace(',', ".");
    let value: Decimal = normalized.parse().map_err(|_| QuantityError::NotANumber)?;
    if value <= Decimal::ZERO {
        return Err(QuantityError::NotPositive);
    }
    Ok(value.normalize())
}

impl MultiSelect {
    pub fn new(kind: CatalogKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            cursor: 0,
        }
    }

    pub fn is_selected(&self, item_id: EntityId) -> bool {
        self.entries.iter().any(|e| e.item_id == item_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add the item with quantity 0, or remove it if already present.
    /// Returns whether the item is selected afterwards.
    pub fn toggle(&mut self, item: &CatalogItem) -> bool {
        if let Some(pos) = self.entries.iter().position(|e| e.item_id == item.id) {
            self.entries.remove(pos);
            false
        } else {
            self.entries.push(Selection {
                item_id: item.id,
                name: item.name.clone(),
                quantity: Decimal::ZERO,
            });
            true
        }
    }

    /// Close the selection and reset the cursor.
    pub fn finish_selection(&mut self) -> AfterSelect {
        self.cursor = 0;
        if self.entries.is_empty() {
            AfterSelect::Skip
        } else {
            AfterSelect::Detail
        }
    }

    /// Entry the detail step is asking about.
    pub fn current(&self) -> Option<&Selection> {
        self.entries.get(self.cursor)
    }

    /// Store a quantity for the current entry and advance. On error nothing
    /// changes.
    pub fn submit_detail(&mut self, raw: &str) -> Result<DetailStep, QuantityError> {
        if self.cursor >= self.entries.len() {
            return Err(QuantityError::NothingPending);
        }
        let quantity = parse_quantity(raw)?;
        self.entries[self.cursor].quantity = quantity;
        self.cursor += 1;
        Ok(if self.cursor >= self.entries.len() {
            DetailStep::Done
        } else {
            DetailStep::Next
        })
    }

    /// Give every remaining entry `quantity` and finish.
    pub fn apply_default(&mut self, quantity: Decimal) {
        for entry in self.entries.iter_mut().skip(self.cursor) {
            entry.quantity = quantity;
        }
        self.cursor = self.entries.len();
    }

    pub fn lines(&self) -> Vec<LineItem> {
        self.entries
            .iter()
            .map(|e| LineItem {
                item_id: e.item_id,
                quantity: e.quantity,
            })
            .collect()
    }

    /// One line per selected item, e.g. `Sugar: 250 g`.
    pub fn summary(&self) -> String {
        if self.entries.is_empty() {
            return "—".to_string();
        }
        self.entries
            .iter()
            .map(|e| format!("{}: {} {}", e.name, e.quantity, self.kind.unit()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Catalog as toggles, current selection marked, then done and cancel.
    pub fn select_prompt(&self, title: &str, catalog: &[CatalogItem]) -> Prompt {
        let prefix = self.kind.token_prefix();
        let toggles = catalog
            .iter()
            .map(|item| {
                let mark = if self.is_selected(item.id) { "✅" } else { "▫️" };
                Choice::new(
                    format!("{mark} {}", item.name),
                    format!("{prefix}:{}", item.id),
                )
            })
            .collect();
        let text = if catalog.is_empty() {
            format!("{title}\n\nThe catalog is empty.")
        } else {
            format!("{title}\n\nSelected: {}", self.entries.len())
        };
        Prompt::new(text)
            .grid(toggles, 2)
            .row(vec![Choice::new("✔️ Done", DONE), Choice::cancel()])
    }

    /// Ask for the quantity of the entry at the cursor.
    pub fn detail_prompt(&self, allow_default: bool) -> Prompt {
        let text = match self.current() {
            Some(entry) => format!(
                "Amount for {} ({}), item {} of {}:",
                entry.name,
                self.kind.unit(),
                self.cursor + 1,
                self.entries.len()
            ),
            None => "All amounts collected.".to_string(),
        };
        let mut row = Vec::new();
        if allow_default {
            row.push(Choice::skip());
        }
        row.push(Choice::cancel());
        Prompt::new(text).row(row)
    }

    /// Feed a select-state input. `None` if the input is not a toggle or done.
    pub async fn on_select(
        &mut self,
        ctx: &WorkflowContext<'_>,
        input: &Input,
    ) -> Result<Option<Collect>, WorkflowError> {
        if input.is_action(DONE) {
            return Ok(Some(match self.finish_selection() {
                AfterSelect::Detail => Collect::Detail,
                AfterSelect::Skip => Collect::Done,
            }));
        }
        let Some(id) = input.entity(self.kind.token_prefix()) else {
            return Ok(None);
        };
        match ctx.repo.get_catalog_item(self.kind, id).await? {
            Some(item) => {
                self.toggle(&item);
                Ok(Some(Collect::Toggled))
            }
            None => Ok(Some(Collect::Stale)),
        }
    }

    /// Feed a detail-state input. `default` is applied on `skip` when given.
    pub fn on_detail(&mut self, input: &Input, default: Option<Decimal>) -> Option<Collect> {
        match input {
            Input::Text(raw) => Some(match self.submit_detail(raw) {
                Ok(DetailStep::Next) => Collect::Next,
                Ok(DetailStep::Done) => Collect::Done,
                Err(e) => Collect::Retry(e.to_string()),
            }),
            Input::Command(cmd) if *cmd == SKIP => {
                let quantity = default?;
                self.apply_default(quantity);
                Some(Collect::Done)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn item(id: EntityId, name: &str) -> CatalogItem {
        CatalogItem {
            id,
            kind: CatalogKind::Ingredient,
            name: name.to_string(),
        }
    }

    #[test]
    fn toggle_twice_restores_selection() {
        let mut ms = MultiSelect::new(CatalogKind::Ingredient);
        ms.toggle(&item(1, "Sugar"));
        let before = ms.clone();
        assert!(ms.toggle(&item(2, "Milk")));
        assert!(!ms.toggle(&item(2, "Milk")));
        assert_eq!(ms, before);
    }

    #[test]
    fn toggle_appends_with_zero_quantity() {
        let mut ms = MultiSelect::new(CatalogKind::Ingredient);
        ms.toggle(&item(5, "Cocoa"));
        assert_eq!(ms.entries[0].quantity, Decimal::ZERO);
    }

    #[test]
    fn empty_selection_skips_detail() {
        let mut ms = MultiSelect::new(CatalogKind::Syrup);
        assert_eq!(ms.finish_selection(), AfterSelect::Skip);
        assert!(ms.current().is_none());
    }

    #[test]
    fn detail_walks_every_entry() {
        let mut ms = MultiSelect::new(CatalogKind::Ingredient);
        ms.toggle(&item(1, "Sugar"));
        ms.toggle(&item(2, "Milk"));
        assert_eq!(ms.finish_selection(), AfterSelect::Detail);
        assert_eq!(ms.submit_detail("250"), Ok(DetailStep::Next));
        assert_eq!(ms.submit_detail("1,5"), Ok(DetailStep::Done));
        assert_eq!(ms.entries[0].quantity, dec!(250));
        assert_eq!(ms.entries[1].quantity, dec!(1.5));
    }

    #[test]
    fn invalid_quantities_change_nothing() {
        let mut ms = MultiSelect::new(CatalogKind::Ingredient);
        ms.toggle(&item(1, "Sugar"));
        ms.finish_selection();
        let before = ms.clone();
        for raw in ["abc", "0", "-5", "", "1e"] {
            assert!(ms.submit_detail(raw).is_err(), "{raw:?} should be rejected");
            assert_eq!(ms, before);
        }
    }

    #[test]
    fn default_fills_remaining_entries() {
        let mut ms = MultiSelect::new(CatalogKind::Extra);
        ms.toggle(&item(1, "Cups"));
        ms.toggle(&item(2, "Lids"));
        ms.finish_selection();
        ms.submit_detail("3").unwrap();
        ms.apply_default(Decimal::ONE);
        assert_eq!(ms.entries[0].quantity, dec!(3));
        assert_eq!(ms.entries[1].quantity, Decimal::ONE);
        assert!(ms.current().is_none());
    }

    #[test]
    fn skip_without_default_is_not_handled() {
        let mut ms = MultiSelect::new(CatalogKind::Ingredient);
        ms.toggle(&item(1, "Sugar"));
        ms.finish_selection();
        assert_eq!(ms.on_detail(&Input::Command(SKIP), None), None);
        assert_eq!(ms.cursor, 0);
    }

    #[test]
    fn select_prompt_marks_selection() {
        let mut ms = MultiSelect::new(CatalogKind::Ingredient);
        let catalog = vec![item(1, "Sugar"), item(2, "Milk")];
        ms.toggle(&catalog[1]);
        let prompt = ms.select_prompt("Ingredients", &catalog);
        let labels: Vec<_> = prompt.choices.iter().flatten().map(|c| &c.label).collect();
        assert!(labels.contains(&&"▫️ Sugar".to_string()));
        assert!(labels.contains(&&"✅ Milk".to_string()));
        assert!(prompt.has_token("ing:2"));
        assert!(prompt.has_token(DONE));
    }

    #[test]
    fn quantity_parsing() {
        assert_eq!(parse_quantity(" 250 "), Ok(dec!(250)));
        assert_eq!(parse_quantity("2,50"), Ok(dec!(2.5)));
        assert_eq!(parse_quantity("zero"), Err(QuantityError::NotANumber));
        assert_eq!(parse_quantity("-1"), Err(QuantityError::NotPositive));
    }
}
