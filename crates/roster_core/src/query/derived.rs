//! Declarative derived queries.
//!
//! A derived query is an ordered list of `(field, operator)` terms joined by
//! AND, plus an optional sort. Field names and operators are checked once in
//! [`DerivedQueryBuilder::build`]; operands are checked in
//! [`DerivedQuery::bind`]. Nothing here touches storage.

use super::field::EntityField;
use super::page::{Direction, Sort};
use super::spec::{Arity, Condition, Operand, Operator, Specification};
use crate::error::ValidationError;
use std::marker::PhantomData;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedQuery<F> {
    terms: Vec<(F, Operator)>,
    sort: Sort<F>,
}

#[derive(Debug, Clone)]
pub struct DerivedQueryBuilder<F> {
    terms: Vec<(String, Operator)>,
    orders: Vec<(String, Direction)>,
    entity: PhantomData<F>,
}

impl<F: EntityField> DerivedQuery<F> {
    pub fn builder() -> DerivedQueryBuilder<F> {
        DerivedQueryBuilder {
            terms: Vec::new(),
            orders: Vec::new(),
            entity: PhantomData,
        }
    }

    /// Operands expected by [`DerivedQuery::bind`]; null checks take none.
    pub fn parameter_count(&self) -> usize {
        self.terms
            .iter()
            .filter(|(_, op)| op.arity() != Arity::None)
            .count()
    }

    pub fn terms(&self) -> &[(F, Operator)] {
        &self.terms
    }

    pub fn sort(&self) -> &Sort<F> {
        &self.sort
    }

    /// Binds one operand per non-null-check term, in term order.
    pub fn bind(&self, operands: Vec<Operand>) -> Result<Specification<F>, ValidationError> {
        let expected = self.parameter_count();
        if operands.len() != expected {
            return Err(ValidationError::ParameterCount {
                expected,
                actual: operands.len(),
            });
        }

        let mut operands = operands.into_iter();
        let mut spec = Specification::All;
        for &(field, op) in &self.terms {
            let operand = match op.arity() {
                Arity::None => Operand::None,
                Arity::Single | Arity::List => operands.next().unwrap_or(Operand::None),
            };
            spec = spec.and(Specification::Leaf(Condition::new(field, op, operand)?));
        }
        Ok(spec)
    }
}

impl<F: EntityField> DerivedQueryBuilder<F> {
    pub fn and(mut self, field: &str, op: Operator) -> Self {
        self.terms.push((field.to_string(), op));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.orders.push((field.to_string(), direction));
        self
    }

    pub fn build(self) -> Result<DerivedQuery<F>, ValidationError> {
        let mut terms = Vec::with_capacity(self.terms.len());
        for (name, op) in self.terms {
            let field = F::parse(&name)?;
            if !op.accepts(field.kind(), field.nullable()) {
                return Err(ValidationError::InvalidOperator {
                    field: field.name(),
                    op,
                });
            }
            terms.push((field, op));
        }

        let mut sort = Sort::unsorted();
        for (name, direction) in self.orders {
            sort = sort.and(F::parse(&name)?, direction);
        }

        Ok(DerivedQuery { terms, sort })
    }
}
