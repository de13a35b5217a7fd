// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Query, selector and payload helpers.

use std::sync::Arc;

use tessera_core::{
    DataId, Fragment, HandleFieldPayload, OperationDescriptor, RecordSource, ResponsePayload,
    Selection, Selector, Variables,
};

/// Query `name` over the root record without variables.
pub fn query(name: &str, selections: Vec<Selection>) -> OperationDescriptor {
    query_with_variables(name, selections, Variables::new())
}

/// Query `name` over the root record with `variables`.
pub fn query_with_variables(
    name: &str,
    selections: Vec<Selection>,
    variables: Variables,
) -> OperationDescriptor {
    OperationDescriptor::new(name, Arc::new(Fragment::new(name, selections)), variables)
}

/// Selector reading fragment `name` on record `id`.
pub fn fragment_selector(id: &str, name: &str, selections: Vec<Selection>) -> Selector {
    Selector::new(
        DataId::new(id),
        Arc::new(Fragment::new(name, selections)),
        Variables::new(),
    )
}

/// Response payload from a source and its handle fields.
pub fn payload(source: RecordSource, field_payloads: Vec<HandleFieldPayload>) -> ResponsePayload {
    ResponsePayload::new(source).with_field_payloads(field_payloads)
}
