//! Call dispatch
//!
//! `invoke` runs one call end to end: arity, constness, representation
//! resolution, argument marshaling, entry selection, the operator calling
//! convention, the native call, and return marshaling. Every failure is
//! returned to the caller; nothing is retried.

use std::sync::Arc;

use natbridge_sdk::{
    BridgeError, BridgeResult, Passing, Representation, TypeTag, UncertainSpec, Virtuality,
};

use super::marshal::{default_representation, return_value, ArgMarshaler};
use super::target::CallTarget;
use super::vtable::NativeEntry;
use crate::object::StructObject;
use crate::shared_state::SharedState;
use crate::uncertainty::{NativeShape, SiteKey};
use crate::value::Value;

/// Invoke `target` on `receiver` with managed `args`
pub(crate) fn invoke(
    state: &Arc<SharedState>,
    target: &CallTarget,
    receiver: &StructObject,
    args: &[Value],
) -> BridgeResult<Value> {
    let convention = target.convention();
    let name = target.display_name();

    // 1. arity
    let expected = convention.managed_args.unwrap_or(target.params().len());
    if args.len() != expected {
        return Err(BridgeError::marshal(format!(
            "{} takes {} argument(s), {} given",
            name,
            expected,
            args.len()
        )));
    }

    // 2. receiver state and constness
    receiver.peer().ensure_live()?;
    if convention.requires_writable {
        receiver.ensure_writable(&name)?;
    }

    // 3-4. representations and argument words
    let mut marshaler = ArgMarshaler::new(state);
    let mut words = Vec::with_capacity(args.len() + 2);
    for (index, (param, value)) in target.params().iter().zip(args).enumerate() {
        let repr = resolve(
            state,
            param.uncertain.as_ref(),
            SiteKey::param(target.owner(), target.index(), index),
            param.passing,
        );
        words.push(marshaler.argument(param, repr, value)?);
    }

    // 5. entry selection
    let entry = select_entry(state, target, receiver)?;

    // 6. operator convention
    let mut receiver_word = receiver.address();
    if !convention.receiver_is_lhs {
        // Reflected binary operator: the managed operand is the left-hand side
        let lhs = words[0];
        words[0] = receiver_word;
        receiver_word = lhs;
    }
    if convention.implicit_int {
        words.push(0);
    }

    // By-value aggregate returns go through a hidden out-buffer
    let ret = target.ret();
    let out = match (&ret.ty, ret.passing) {
        (TypeTag::Aggregate(key), Passing::ByValue) => {
            let layout = state.cache.layout(key)?;
            let buffer = state
                .registry
                .allocate(layout.size, layout.align, Some(key.clone()))?;
            words.push(buffer.address());
            Some(StructObject::new(state.clone(), buffer, 0, layout)?)
        }
        _ => None,
    };

    let temps = marshaler.into_temporaries();
    tracing::debug!(
        call = %name,
        receiver = format_args!("{:#x}", receiver.address()),
        args = words.len(),
        temporaries = temps.len(),
        "dispatching native call"
    );

    let bits = unsafe { entry(receiver_word, words.as_ptr(), words.len()) };
    drop(temps);

    // 7. return
    if let Some(out) = out {
        return Ok(Value::Struct(out));
    }
    let repr = resolve(
        state,
        ret.uncertain.as_ref(),
        SiteKey::ret(target.owner(), target.index()),
        ret.passing,
    );
    return_value(state, ret, repr, bits)
}

fn resolve(
    state: &SharedState,
    spec: Option<&UncertainSpec>,
    site: SiteKey,
    passing: Passing,
) -> Representation {
    match spec {
        Some(spec) => {
            state
                .resolver
                .resolve(spec, site, NativeShape::of_passing(passing))
                .chosen
        }
        None => default_representation(passing),
    }
}

/// Pick the native entry for `target` on `receiver`
fn select_entry(
    state: &SharedState,
    target: &CallTarget,
    receiver: &StructObject,
) -> BridgeResult<NativeEntry> {
    let desc = target.descriptor();
    let owner = target.owner();
    let fixed = || state.tables.fixed(owner, &desc.kind, desc.symbol.as_deref());

    let slot = match (desc.virtuality, desc.slot) {
        (Virtuality::NonVirtual, _) => {
            return fixed().ok_or_else(|| {
                BridgeError::dispatch(format!("no entry bound for {}", target.display_name()))
            })
        }
        (_, Some(slot)) => slot,
        (_, None) => {
            return Err(BridgeError::dispatch(format!(
                "{} is virtual but has no slot",
                target.display_name()
            )))
        }
    };

    let runtime = state
        .type_source()
        .runtime_type(receiver.peer(), owner)
        .unwrap_or_else(|| owner.clone());
    let catalog = state.catalog();
    if let Some(entry) = state
        .tables
        .virtual_entry(&runtime, slot, |ty| catalog.parent(ty))
    {
        return Ok(entry);
    }

    match desc.virtuality {
        Virtuality::PureVirtual => Err(BridgeError::dispatch(format!(
            "pure virtual {} has no override for runtime type {}",
            target.display_name(),
            runtime
        ))),
        _ => fixed().ok_or_else(|| {
            BridgeError::dispatch(format!(
                "no override or fixed entry for virtual {} on {}",
                target.display_name(),
                runtime
            ))
        }),
    }
}
