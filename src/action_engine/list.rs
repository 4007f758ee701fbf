//! `listActions` / `listOutputs` (§4.2): predicate-filtered, paginated
//! reads over the Transaction and Output stores via `storage::spec::Spec`.

use crate::action_engine::types::{ListActionsArgs, ListActionsResult, ListOutputsArgs, ListOutputsResult};
use crate::error::AppError;
use crate::storage::repo::{self, Page};
use crate::storage::spec::Spec;
use crate::storage::Store;
use crate::types::{Output, Transaction, UserId};

pub fn list_actions(store: &Store, user_id: UserId, args: ListActionsArgs) -> Result<ListActionsResult, AppError> {
    let mut spec = Spec::<Transaction>::new();
    if !args.labels.is_empty() {
        spec = spec.tags_match(
            |tx: &Transaction| tx.labels.iter().cloned().collect(),
            args.labels.clone(),
            args.label_query_mode_all,
        );
    }

    let (actions, total_actions) = repo::list_and_count_actions(
        store,
        user_id,
        &spec,
        Page {
            offset: args.offset,
            limit: args.limit,
        },
    )?;

    Ok(ListActionsResult {
        total_actions,
        actions,
    })
}

pub fn list_outputs(store: &Store, user_id: UserId, args: ListOutputsArgs) -> Result<ListOutputsResult, AppError> {
    let mut spec = Spec::<Output>::new();
    if let Some(basket) = args.basket.clone() {
        spec = spec.eq(move |o: &Output| o.basket_name.clone(), Some(basket));
    }
    if !args.tags.is_empty() {
        spec = spec.tags_match(|o: &Output| o.tags.clone(), args.tags.clone(), args.tag_query_mode_all);
    }

    let page = repo::list_and_count_outputs(
        store,
        user_id,
        &spec,
        Page {
            offset: args.offset,
            limit: args.limit,
        },
    )?;

    Ok(ListOutputsResult {
        total_outputs: page.total_count,
        total_value: page.total_value,
        outputs: page.items,
    })
}
