//! Object materialization: resolving a column schema against a target
//! type's construction surface, once per stream, into an immutable plan.
//!
//! Rust has no runtime reflection, so target types advertise their
//! constructors and settable members as data through [`Materialize::shape`].
//! Plan resolution walks that shape exactly once per (target type, schema
//! fingerprint): it scores candidate constructors, falls back to member
//! feeding over a default instance, and binds columns to slots through the
//! name-resolution chain (exact, case-insensitive, snake_case→PascalCase,
//! order attribute, positional). Row materialization then reuses the plan
//! for every record with no further decisions.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use heck::ToUpperCamelCase;

use crate::error::FaultKind;
use crate::schema::{ColumnDescriptor, Schema};
use crate::value::{SlotType, Value, ValueTypeError};

/// The construction surface of a nested structural parameter.
#[derive(Debug, Clone, Copy)]
pub struct NestedShape {
    pub shape: fn() -> TypeShape,
    /// Builds the nested instance and boxes it as [`Value::Composite`].
    pub construct: fn(usize, Vec<Value>) -> Result<Value, MaterializeError>,
}

/// How one constructor parameter is filled.
#[derive(Debug, Clone, Copy)]
pub enum SlotKind {
    Scalar(SlotType),
    Nested(NestedShape),
}

/// One constructor parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamShape {
    pub name: &'static str,
    pub kind: SlotKind,
    /// When true, the constructor substitutes its own default for a `Null`
    /// argument in this position.
    pub has_default: bool,
}

impl ParamShape {
    pub const fn scalar(name: &'static str, slot: SlotType) -> Self {
        ParamShape {
            name,
            kind: SlotKind::Scalar(slot),
            has_default: false,
        }
    }

    pub const fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }
}

/// Declare a nested structural parameter materialized recursively from
/// unclaimed schema columns.
pub fn nested_param<T: Materialize + Send>(name: &'static str) -> ParamShape {
    ParamShape {
        name,
        kind: SlotKind::Nested(NestedShape {
            shape: T::shape,
            construct: |ctor, args| {
                T::construct(ctor, args).map(|v| Value::Composite(Box::new(v)))
            },
        }),
        has_default: false,
    }
}

#[derive(Debug, Clone)]
pub struct CtorShape {
    pub params: Vec<ParamShape>,
}

/// One settable field or property.
#[derive(Debug, Clone, Copy)]
pub struct MemberShape {
    pub name: &'static str,
    pub ty: SlotType,
    /// Explicit ordinal for order-attribute matching (0-based column
    /// index).
    pub order: Option<u32>,
}

impl MemberShape {
    pub const fn new(name: &'static str, ty: SlotType) -> Self {
        MemberShape {
            name,
            ty,
            order: None,
        }
    }

    pub const fn ordered(name: &'static str, ty: SlotType, order: u32) -> Self {
        MemberShape {
            name,
            ty,
            order: Some(order),
        }
    }
}

/// The construction surface of a target type.
#[derive(Debug, Clone)]
pub struct TypeShape {
    pub name: &'static str,
    pub constructors: Vec<CtorShape>,
    pub members: Vec<MemberShape>,
    pub default_constructible: bool,
}

/// A type that rows can be materialized into.
pub trait Materialize: Sized + 'static {
    fn shape() -> TypeShape;

    /// Invoke constructor `ctor` with one argument per parameter, in
    /// parameter order. Arguments arrive already coerced to the declared
    /// slot types; `Null` stands in for "use the declared default".
    fn construct(ctor: usize, args: Vec<Value>) -> Result<Self, MaterializeError>;

    /// A default instance for member feeding, when the type supports it.
    fn default_instance() -> Option<Self> {
        None
    }

    /// Assign `value` to settable member `member`.
    fn apply(&mut self, member: usize, value: Value) -> Result<(), MaterializeError> {
        let _ = (member, value);
        Err(MaterializeError::NotSettable {
            target: std::any::type_name::<Self>(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("no viable construction plan for {target}: {reason}")]
    NoPlan { target: &'static str, reason: String },

    #[error("{target} is not default-constructible")]
    NoDefault { target: &'static str },

    #[error("{target} has no settable members")]
    NotSettable { target: &'static str },

    #[error("parameter {param} of {target} is unbound and has no default")]
    UnboundParameter {
        target: &'static str,
        param: &'static str,
    },

    #[error("constructor received too few arguments")]
    Arity,

    #[error(transparent)]
    Value(#[from] ValueTypeError),
}

impl MaterializeError {
    pub fn kind(&self) -> FaultKind {
        match self {
            MaterializeError::Value(_) => FaultKind::Conversion,
            MaterializeError::UnboundParameter { .. } => FaultKind::Schema,
            _ => FaultKind::Materialization,
        }
    }
}

/// Where one constructor argument comes from.
#[derive(Debug, Clone)]
pub enum ArgSource {
    /// Take the row value at `index` and coerce it to `slot`.
    Column { index: usize, slot: SlotType },
    /// Pass `Null`; the constructor substitutes its declared default.
    Default,
    /// No column claimed this parameter: pass the slot's zero value, or
    /// `Null` for optional slots.
    Zero(SlotType),
    /// Materialize a nested instance from other columns of the same row.
    Nested(Box<NestedPlan>),
}

#[derive(Debug, Clone)]
pub struct NestedPlan {
    pub construct: fn(usize, Vec<Value>) -> Result<Value, MaterializeError>,
    pub ctor: usize,
    pub args: Vec<ArgSource>,
}

/// One column's binding under member feeding.
#[derive(Debug, Clone, Copy)]
pub struct FeedBinding {
    pub member: usize,
    pub slot: SlotType,
}

/// The immutable, reusable decision of how to build one target instance
/// from one row of converted values.
#[derive(Debug, Clone)]
pub enum Plan {
    Ctor { ctor: usize, args: Vec<ArgSource> },
    Feed { bindings: Vec<Option<FeedBinding>> },
}

/// Score one column type against one slot type.
///
/// Exact match = 3, widening = 2, runtime parse/render through strings = 1,
/// null-into-optional = 1, otherwise infeasible.
fn score_match(col: Option<crate::value::ColumnType>, slot: SlotType) -> Option<u32> {
    use crate::value::ColumnType as C;
    let col = col.unwrap_or(C::Str);
    if col == slot.ty {
        return Some(3);
    }
    let widening = matches!(
        (col, slot.ty),
        (C::I32, C::I64)
            | (C::I32, C::F64)
            | (C::I32, C::Decimal)
            | (C::I64, C::F64)
            | (C::I64, C::Decimal)
            | (C::Decimal, C::F64)
    );
    if widening {
        return Some(2);
    }
    if col == C::Str || slot.ty == C::Str {
        return Some(1);
    }
    if slot.optional {
        return Some(1);
    }
    None
}

/// Resolve `column` against candidate slot names by name alone: exact,
/// then case-insensitive, then snake_case→PascalCase (each
/// case-insensitive).
fn resolve_by_name(column: &ColumnDescriptor, names: &[&'static str]) -> Option<usize> {
    if let Some(i) = names.iter().position(|n| *n == column.name) {
        return Some(i);
    }
    let lowered = column.name.to_lowercase();
    if let Some(i) = names.iter().position(|n| n.to_lowercase() == lowered) {
        return Some(i);
    }
    let pascal = column.name.to_upper_camel_case().to_lowercase();
    if pascal != lowered {
        if let Some(i) = names.iter().position(|n| n.to_lowercase() == pascal) {
            return Some(i);
        }
    }
    None
}

struct CtorBinding {
    args: Vec<ArgSource>,
    score: u32,
    by_name: usize,
    params: usize,
}

/// Bind one constructor against the unclaimed columns. `claimed` is only
/// committed when the binding succeeds.
fn bind_ctor(
    target: &'static str,
    ctor: &CtorShape,
    schema: &Schema,
    claimed: &[bool],
    positional: bool,
) -> Result<(CtorBinding, Vec<bool>), MaterializeError> {
    if ctor.params.len() > schema.width() {
        return Err(MaterializeError::NoPlan {
            target,
            reason: format!(
                "constructor has {} parameters but the schema has {} columns",
                ctor.params.len(),
                schema.width()
            ),
        });
    }

    let mut claimed = claimed.to_vec();
    let names: Vec<&'static str> = ctor.params.iter().map(|p| p.name).collect();

    // Name resolution runs as passes so a positional fallback can never
    // shadow a later column's name match: all name-based bindings first,
    // then positional assignment of whatever is left.
    let mut param_col: Vec<Option<(usize, bool)>> = vec![None; ctor.params.len()];
    let mut used = claimed.clone();
    for column in schema.columns() {
        if used[column.index] {
            continue;
        }
        if let Some(p) = resolve_by_name(column, &names) {
            if param_col[p].is_none() && !matches!(ctor.params[p].kind, SlotKind::Nested(_)) {
                param_col[p] = Some((column.index, true));
                used[column.index] = true;
            }
        }
    }
    if positional {
        for (p, param) in ctor.params.iter().enumerate() {
            if param_col[p].is_none()
                && !matches!(param.kind, SlotKind::Nested(_))
                && p < schema.width()
                && !used[p]
            {
                param_col[p] = Some((p, false));
                used[p] = true;
            }
        }
    }
    for assigned in param_col.iter().flatten() {
        claimed[assigned.0] = true;
    }

    let mut args = Vec::with_capacity(ctor.params.len());
    let mut score = 0u32;
    let mut by_name = 0usize;

    for (p, param) in ctor.params.iter().enumerate() {
        match param.kind {
            SlotKind::Scalar(slot) => match param_col[p] {
                Some((col, named)) => {
                    let column = schema.column(col).ok_or(MaterializeError::Arity)?;
                    let s = score_match(column.ty, slot).ok_or_else(|| {
                        MaterializeError::NoPlan {
                            target,
                            reason: format!(
                                "column {} cannot feed parameter {}",
                                column.name, param.name
                            ),
                        }
                    })?;
                    score += s;
                    if named {
                        by_name += 1;
                    }
                    args.push(ArgSource::Column { index: col, slot });
                }
                None if param.has_default => args.push(ArgSource::Default),
                None => args.push(ArgSource::Zero(slot)),
            },
            SlotKind::Nested(nested) => {
                let shape = (nested.shape)();
                match bind_best_ctor(shape.name, &shape.constructors, schema, &claimed, false) {
                    Ok((ctor_index, binding, nested_claimed)) => {
                        claimed = nested_claimed;
                        score += binding.score;
                        by_name += binding.by_name;
                        args.push(ArgSource::Nested(Box::new(NestedPlan {
                            construct: nested.construct,
                            ctor: ctor_index,
                            args: binding.args,
                        })));
                    }
                    Err(_) if param.has_default => args.push(ArgSource::Default),
                    Err(_) => {
                        return Err(MaterializeError::UnboundParameter {
                            target,
                            param: param.name,
                        })
                    }
                }
            }
        }
    }

    Ok((
        CtorBinding {
            args,
            score,
            by_name,
            params: ctor.params.len(),
        },
        claimed,
    ))
}

/// Pick the highest-scoring feasible constructor. Ties prefer more by-name
/// matches, then fewer parameters.
fn bind_best_ctor(
    target: &'static str,
    ctors: &[CtorShape],
    schema: &Schema,
    claimed: &[bool],
    positional: bool,
) -> Result<(usize, CtorBinding, Vec<bool>), MaterializeError> {
    let mut best: Option<(usize, CtorBinding, Vec<bool>)> = None;
    let mut failure: Option<MaterializeError> = None;

    for (i, ctor) in ctors.iter().enumerate() {
        match bind_ctor(target, ctor, schema, claimed, positional) {
            Ok((binding, ctor_claimed)) => {
                let better = match &best {
                    None => true,
                    Some((_, current, _)) => {
                        (binding.score, binding.by_name, std::cmp::Reverse(binding.params))
                            > (current.score, current.by_name, std::cmp::Reverse(current.params))
                    }
                };
                if better {
                    best = Some((i, binding, ctor_claimed));
                }
            }
            Err(e) => {
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }
    }

    best.ok_or_else(|| {
        failure.unwrap_or(MaterializeError::NoPlan {
            target,
            reason: "type declares no constructors".to_string(),
        })
    })
}

/// Resolve the construction plan for `shape` against `schema`. Called at
/// most once per stream per target type; the result is pure data.
pub fn resolve_plan(shape: &TypeShape, schema: &Schema) -> Result<Plan, MaterializeError> {
    let claimed = vec![false; schema.width()];
    let positional = shape.members.is_empty();

    let ctor_result = if shape.constructors.is_empty() {
        Err(MaterializeError::NoPlan {
            target: shape.name,
            reason: "type declares no constructors".to_string(),
        })
    } else {
        bind_best_ctor(shape.name, &shape.constructors, schema, &claimed, positional)
            .map(|(ctor, binding, _)| Plan::Ctor {
                ctor,
                args: binding.args,
            })
    };

    match ctor_result {
        Ok(plan) => {
            if let Plan::Ctor { ctor, .. } = &plan {
                tracing::debug!(ty = shape.name, ctor = *ctor, "resolved constructor plan");
            }
            Ok(plan)
        }
        Err(ctor_err) => {
            if !shape.default_constructible {
                return Err(ctor_err);
            }
            // Member feeding: bind each column to a settable member, or an
            // ignore sentinel.
            let names: Vec<&'static str> = shape.members.iter().map(|m| m.name).collect();
            let orders: Vec<Option<u32>> = shape.members.iter().map(|m| m.order).collect();
            tracing::debug!(ty = shape.name, "falling back to member feeding");
            let mut used = vec![false; shape.members.len()];
            let mut bindings = Vec::with_capacity(schema.width());
            for column in schema.columns() {
                let resolved = resolve_by_name(column, &names).or_else(|| {
                    orders
                        .iter()
                        .position(|order| *order == Some(column.index as u32))
                });
                let binding = resolved.filter(|m| !used[*m]).map(|m| {
                    used[m] = true;
                    FeedBinding {
                        member: m,
                        slot: shape.members[m].ty,
                    }
                });
                bindings.push(binding);
            }
            Ok(Plan::Feed { bindings })
        }
    }
}

/// Take the value at `index` out of the row, leaving `Null`. Each column
/// feeds at most one slot, so the take is safe.
fn take_value(values: &mut [Value], index: usize) -> Value {
    values
        .get_mut(index)
        .map(|slot| std::mem::replace(slot, Value::Null))
        .unwrap_or(Value::Null)
}

fn coerce(value: Value, slot: SlotType) -> Result<Value, ValueTypeError> {
    if value.is_null() && slot.optional {
        return Ok(Value::Null);
    }
    value.convert_to(slot.ty)
}

fn arg_value(source: &ArgSource, values: &mut [Value]) -> Result<Value, MaterializeError> {
    match source {
        ArgSource::Column { index, slot } => {
            let value = take_value(values, *index);
            Ok(coerce(value, *slot)?)
        }
        ArgSource::Default => Ok(Value::Null),
        ArgSource::Zero(slot) => Ok(if slot.optional {
            Value::Null
        } else {
            slot.ty.zero_value()
        }),
        ArgSource::Nested(plan) => {
            let args = build_args(&plan.args, values)?;
            (plan.construct)(plan.ctor, args)
        }
    }
}

fn build_args(sources: &[ArgSource], values: &mut [Value]) -> Result<Vec<Value>, MaterializeError> {
    sources.iter().map(|s| arg_value(s, values)).collect()
}

/// Build one instance from one row of converted values, following `plan`.
/// Allocation-minimal: the argument array is the only per-row allocation.
pub fn materialize_row<T: Materialize>(
    plan: &Plan,
    values: &mut [Value],
) -> Result<T, MaterializeError> {
    match plan {
        Plan::Ctor { ctor, args } => {
            let argv = build_args(args, values)?;
            T::construct(*ctor, argv)
        }
        Plan::Feed { bindings } => {
            let mut instance = T::default_instance().ok_or(MaterializeError::NoDefault {
                target: std::any::type_name::<T>(),
            })?;
            for (index, binding) in bindings.iter().enumerate() {
                if let Some(binding) = binding {
                    let value = coerce(take_value(values, index), binding.slot)?;
                    instance.apply(binding.member, value)?;
                }
            }
            Ok(instance)
        }
    }
}

/// Caller-owned cache of resolved plans, keyed by target type and schema
/// fingerprint. Lifetime is bounded by the reader that owns it; there is
/// no process-wide plan state.
#[derive(Debug, Default)]
pub struct PlanCache {
    plans: HashMap<(TypeId, u64), Arc<Plan>>,
    resolutions: usize,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan_for<T: Materialize>(&mut self, schema: &Schema) -> Result<Arc<Plan>, MaterializeError> {
        let key = (TypeId::of::<T>(), schema.fingerprint());
        if let Some(plan) = self.plans.get(&key) {
            return Ok(plan.clone());
        }
        let plan = Arc::new(resolve_plan(&T::shape(), schema)?);
        self.resolutions += 1;
        self.plans.insert(key, plan.clone());
        Ok(plan)
    }

    /// How many plans were actually resolved (cache misses).
    pub fn resolutions(&self) -> usize {
        self.resolutions
    }
}

macro_rules! impl_materialize_tuple {
    ($($t:ident),+) => {
        impl<$($t,)+> Materialize for ($($t,)+)
        where
            $($t: crate::value::FromValue + Send + 'static,)+
        {
            fn shape() -> TypeShape {
                TypeShape {
                    name: "tuple",
                    constructors: vec![CtorShape {
                        params: vec![$(ParamShape::scalar("", $t::SLOT)),+],
                    }],
                    members: Vec::new(),
                    default_constructible: false,
                }
            }

            fn construct(_ctor: usize, args: Vec<Value>) -> Result<Self, MaterializeError> {
                let mut iter = args.into_iter();
                Ok(($($t::from_value(iter.next().ok_or(MaterializeError::Arity)?)?,)+))
            }
        }
    };
}

impl_materialize_tuple!(A);
impl_materialize_tuple!(A, B);
impl_materialize_tuple!(A, B, C);
impl_materialize_tuple!(A, B, C, D);
impl_materialize_tuple!(A, B, C, D, E);
impl_materialize_tuple!(A, B, C, D, E, F);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ColumnType, FromValue};
    use pretty_assertions::assert_eq;

    #[derive(Debug, Default, PartialEq)]
    struct Person {
        first_name: String,
        birth_year: i32,
    }

    impl Materialize for Person {
        fn shape() -> TypeShape {
            TypeShape {
                name: "Person",
                constructors: vec![CtorShape {
                    params: vec![
                        ParamShape::scalar("FirstName", SlotType::of(ColumnType::Str)),
                        ParamShape::scalar("BirthYear", SlotType::of(ColumnType::I32)),
                    ],
                }],
                members: Vec::new(),
                default_constructible: false,
            }
        }

        fn construct(_ctor: usize, args: Vec<Value>) -> Result<Self, MaterializeError> {
            let mut iter = args.into_iter();
            Ok(Person {
                first_name: String::from_value(iter.next().ok_or(MaterializeError::Arity)?)?,
                birth_year: i32::from_value(iter.next().ok_or(MaterializeError::Arity)?)?,
            })
        }
    }

    fn schema(names: &[&str], types: &[Option<ColumnType>]) -> Schema {
        let mut schema = Schema::from_names(names.iter().copied());
        schema.set_types(types.to_vec());
        schema
    }

    #[test]
    fn snake_case_columns_bind_pascal_case_parameters() {
        let schema = schema(
            &["first_name", "birth_year"],
            &[Some(ColumnType::Str), Some(ColumnType::I32)],
        );
        let plan = resolve_plan(&Person::shape(), &schema).unwrap();
        let mut row = vec![Value::Str("Charlie".into()), Value::I32(1990)];
        let person: Person = materialize_row(&plan, &mut row).unwrap();
        assert_eq!(
            person,
            Person {
                first_name: "Charlie".into(),
                birth_year: 1990
            }
        );
    }

    #[test]
    fn tuples_bind_positionally() {
        let schema = schema(
            &["a", "b", "c"],
            &[Some(ColumnType::I32), Some(ColumnType::Str), Some(ColumnType::Bool)],
        );
        let plan = resolve_plan(&<(i32, String, bool)>::shape(), &schema).unwrap();
        let mut row = vec![
            Value::I32(7),
            Value::Str("x".into()),
            Value::Bool(true),
        ];
        let tuple: (i32, String, bool) = materialize_row(&plan, &mut row).unwrap();
        assert_eq!(tuple, (7, "x".to_string(), true));
    }

    #[derive(Debug, Default, PartialEq)]
    struct Loose {
        name: String,
        age: Option<i32>,
    }

    impl Materialize for Loose {
        fn shape() -> TypeShape {
            TypeShape {
                name: "Loose",
                constructors: Vec::new(),
                members: vec![
                    MemberShape::new("Name", SlotType::of(ColumnType::Str)),
                    MemberShape::new("Age", SlotType::optional(ColumnType::I32)),
                ],
                default_constructible: true,
            }
        }

        fn construct(_ctor: usize, _args: Vec<Value>) -> Result<Self, MaterializeError> {
            Err(MaterializeError::NoPlan {
                target: "Loose",
                reason: "no constructors".into(),
            })
        }

        fn default_instance() -> Option<Self> {
            Some(Loose::default())
        }

        fn apply(&mut self, member: usize, value: Value) -> Result<(), MaterializeError> {
            match member {
                0 => self.name = String::from_value(value)?,
                1 => self.age = Option::<i32>::from_value(value)?,
                _ => return Err(MaterializeError::Arity),
            }
            Ok(())
        }
    }

    #[test]
    fn member_feeding_ignores_unresolved_columns() {
        let schema = schema(
            &["name", "age", "extra"],
            &[Some(ColumnType::Str), Some(ColumnType::I32), None],
        );
        let plan = resolve_plan(&Loose::shape(), &schema).unwrap();
        match &plan {
            Plan::Feed { bindings } => {
                assert!(bindings[0].is_some());
                assert!(bindings[1].is_some());
                assert!(bindings[2].is_none());
            }
            other => panic!("expected feed plan, got {other:?}"),
        }
        let mut row = vec![
            Value::Str("Ada".into()),
            Value::I32(36),
            Value::Str("ignored".into()),
        ];
        let loose: Loose = materialize_row(&plan, &mut row).unwrap();
        assert_eq!(
            loose,
            Loose {
                name: "Ada".into(),
                age: Some(36)
            }
        );
    }

    #[derive(Debug, PartialEq)]
    struct GroupKey {
        is_active: bool,
        region: String,
    }

    impl Materialize for GroupKey {
        fn shape() -> TypeShape {
            TypeShape {
                name: "GroupKey",
                constructors: vec![CtorShape {
                    params: vec![
                        ParamShape::scalar("IsActive", SlotType::of(ColumnType::Bool)),
                        ParamShape::scalar("Region", SlotType::of(ColumnType::Str)),
                    ],
                }],
                members: Vec::new(),
                default_constructible: false,
            }
        }

        fn construct(_ctor: usize, args: Vec<Value>) -> Result<Self, MaterializeError> {
            let mut iter = args.into_iter();
            Ok(GroupKey {
                is_active: bool::from_value(iter.next().ok_or(MaterializeError::Arity)?)?,
                region: String::from_value(iter.next().ok_or(MaterializeError::Arity)?)?,
            })
        }
    }

    #[derive(Debug, PartialEq)]
    struct GroupRow {
        key: GroupKey,
        count: i64,
    }

    impl Materialize for GroupRow {
        fn shape() -> TypeShape {
            TypeShape {
                name: "GroupRow",
                constructors: vec![CtorShape {
                    params: vec![
                        nested_param::<GroupKey>("Key"),
                        ParamShape::scalar("Count", SlotType::of(ColumnType::I64)),
                    ],
                }],
                members: Vec::new(),
                default_constructible: false,
            }
        }

        fn construct(_ctor: usize, args: Vec<Value>) -> Result<Self, MaterializeError> {
            let mut iter = args.into_iter();
            let key = match iter.next().ok_or(MaterializeError::Arity)? {
                Value::Composite(boxed) => *boxed
                    .downcast::<GroupKey>()
                    .map_err(|_| MaterializeError::Arity)?,
                other => {
                    return Err(MaterializeError::Value(ValueTypeError {
                        wanted: "GroupKey",
                        found: format!("{other:?}"),
                    }))
                }
            };
            Ok(GroupRow {
                key,
                count: i64::from_value(iter.next().ok_or(MaterializeError::Arity)?)?,
            })
        }
    }

    #[test]
    fn nested_parameters_claim_leftover_columns() {
        let schema = schema(
            &["IsActive", "Region", "Count"],
            &[
                Some(ColumnType::Bool),
                Some(ColumnType::Str),
                Some(ColumnType::I64),
            ],
        );
        let plan = resolve_plan(&GroupRow::shape(), &schema).unwrap();
        let mut row = vec![
            Value::Bool(true),
            Value::Str("emea".into()),
            Value::I64(12),
        ];
        let grouped: GroupRow = materialize_row(&plan, &mut row).unwrap();
        assert_eq!(
            grouped,
            GroupRow {
                key: GroupKey {
                    is_active: true,
                    region: "emea".into()
                },
                count: 12
            }
        );
    }

    #[test]
    fn plan_cache_resolves_once_per_type_and_schema() {
        let schema = schema(
            &["first_name", "birth_year"],
            &[Some(ColumnType::Str), Some(ColumnType::I32)],
        );
        let mut cache = PlanCache::new();
        cache.plan_for::<Person>(&schema).unwrap();
        cache.plan_for::<Person>(&schema).unwrap();
        cache.plan_for::<Person>(&schema).unwrap();
        assert_eq!(cache.resolutions(), 1);
    }

    #[test]
    fn tie_break_prefers_name_matches_then_fewer_parameters() {
        struct TwoCtors;
        impl Materialize for TwoCtors {
            fn shape() -> TypeShape {
                TypeShape {
                    name: "TwoCtors",
                    constructors: vec![
                        CtorShape {
                            params: vec![
                                ParamShape::scalar("a", SlotType::of(ColumnType::Str)),
                                ParamShape::scalar("zz", SlotType::of(ColumnType::Str))
                                    .with_default(),
                            ],
                        },
                        CtorShape {
                            params: vec![ParamShape::scalar("a", SlotType::of(ColumnType::Str))],
                        },
                    ],
                    // A settable member disables positional fallback, so
                    // the unmatched "zz" parameter stays unbound.
                    members: vec![MemberShape::new("Unused", SlotType::of(ColumnType::Str))],
                    default_constructible: false,
                }
            }

            fn construct(ctor: usize, _args: Vec<Value>) -> Result<Self, MaterializeError> {
                if ctor == 1 {
                    Ok(TwoCtors)
                } else {
                    Err(MaterializeError::Arity)
                }
            }
        }

        // Both constructors are feasible and score identically on the
        // matched column; the single-parameter one must win.
        let schema = schema(&["a", "b"], &[Some(ColumnType::Str), Some(ColumnType::Str)]);
        let plan = resolve_plan(&TwoCtors::shape(), &schema).unwrap();
        match plan {
            Plan::Ctor { ctor, .. } => assert_eq!(ctor, 1),
            other => panic!("expected ctor plan, got {other:?}"),
        }
    }
}
