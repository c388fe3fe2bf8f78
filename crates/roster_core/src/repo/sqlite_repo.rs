//! Generic repository over a [`UnitOfWork`].

use super::{Repository, SpecificationExecutor};
use crate::engine::{LockMode, Projection, SqlEntity, Window};
use crate::error::{RepoError, RepoResult};
use crate::query::field::{EntityField, Value};
use crate::query::{
    Assignment, BulkUpdate, Example, Operand, Operator, Page, PageRequest, Slice, Sort,
    Specification,
};
use crate::uow::UnitOfWork;
use std::marker::PhantomData;

/// Repository of `E` bound to one unit of work.
///
/// Cheap to create; make one per entity type whenever needed.
pub struct SqliteRepository<'uow, E> {
    uow: &'uow UnitOfWork,
    entity: PhantomData<fn() -> E>,
}

impl<'uow, E: SqlEntity> SqliteRepository<'uow, E> {
    pub fn new(uow: &'uow UnitOfWork) -> Self {
        Self {
            uow,
            entity: PhantomData,
        }
    }

    pub fn unit_of_work(&self) -> &'uow UnitOfWork {
        self.uow
    }

    /// Matching rows read into a read model; never tracked.
    pub fn find_projected<P: Projection<E>>(
        &self,
        spec: &Specification<E::Field>,
        sort: &Sort<E::Field>,
    ) -> RepoResult<Vec<P>> {
        self.uow.query_projection::<E, P>(spec, sort, Window::all())
    }

    /// Paged read model rows.
    pub fn find_projected_page<P: Projection<E>>(
        &self,
        spec: &Specification<E::Field>,
        request: &PageRequest<E::Field>,
    ) -> RepoResult<Page<P>> {
        let content = self
            .uow
            .query_projection::<E, P>(spec, request.sort(), page_window(request))?;
        let total = self.uow.count::<E>(spec)?;
        Ok(Page::new(content, request.page(), request.size(), total))
    }

    /// Locks every matching row in `mode` until the unit of work ends.
    pub fn find_locked(
        &self,
        spec: &Specification<E::Field>,
        mode: LockMode,
    ) -> RepoResult<Vec<E>> {
        self.uow.query_locked::<E>(spec, &Sort::unsorted(), mode)
    }

    /// Exactly one match; `NotFound` for none, `NonUniqueResult` for many.
    pub fn get_one(&self, spec: &Specification<E::Field>, lookup: &str) -> RepoResult<E> {
        self.find_one(spec)?
            .ok_or_else(|| RepoError::not_found(E::KIND.as_str(), lookup))
    }
}

impl<E: SqlEntity> Repository<E> for SqliteRepository<'_, E> {
    fn save(&self, entity: E) -> RepoResult<E> {
        self.uow.save(entity)
    }

    fn find_by_id(&self, id: E::Id) -> RepoResult<Option<E>> {
        self.uow.find(id)
    }

    fn find_read_only_by_id(&self, id: E::Id) -> RepoResult<Option<E>> {
        self.uow.find_uncached(id)
    }

    fn find_all_by_ids(&self, ids: &[E::Id]) -> RepoResult<Vec<E>> {
        let spec = Specification::leaf_unchecked(
            <E::Field as EntityField>::ID,
            Operator::In,
            Operand::List(ids.iter().map(|id| Value::Uuid((*id).into())).collect()),
        );
        self.uow.query(&spec, &Sort::unsorted(), Window::all())
    }

    fn exists_by_id(&self, id: E::Id) -> RepoResult<bool> {
        if self.uow.contains::<E>(id) {
            return Ok(true);
        }
        let spec = Specification::leaf_unchecked(
            <E::Field as EntityField>::ID,
            Operator::Equals,
            Operand::Single(Value::Uuid(id.into())),
        );
        Ok(self.uow.count::<E>(&spec)? > 0)
    }

    fn find_all(&self) -> RepoResult<Vec<E>> {
        self.find_all_sorted(&Sort::unsorted())
    }

    fn find_all_sorted(&self, sort: &Sort<E::Field>) -> RepoResult<Vec<E>> {
        self.uow.query(&Specification::All, sort, Window::all())
    }

    fn count(&self) -> RepoResult<u64> {
        self.uow.count::<E>(&Specification::All)
    }

    fn delete(&self, entity: &E) -> RepoResult<()> {
        match entity.id() {
            Some(id) => self.uow.delete::<E>(id),
            None => Err(RepoError::not_found(E::KIND.as_str(), "<unsaved>")),
        }
    }

    fn delete_by_id(&self, id: E::Id) -> RepoResult<()> {
        self.uow.delete::<E>(id)
    }
}

impl<E: SqlEntity> SpecificationExecutor<E> for SqliteRepository<'_, E> {
    fn find_all_matching(&self, spec: &Specification<E::Field>) -> RepoResult<Vec<E>> {
        self.find_all_matching_sorted(spec, &Sort::unsorted())
    }

    fn find_all_matching_sorted(
        &self,
        spec: &Specification<E::Field>,
        sort: &Sort<E::Field>,
    ) -> RepoResult<Vec<E>> {
        self.uow.query(spec, sort, Window::all())
    }

    fn find_one(&self, spec: &Specification<E::Field>) -> RepoResult<Option<E>> {
        let mut rows = self.uow.query(spec, &Sort::unsorted(), Window::new(0, 2))?;
        if rows.len() > 1 {
            let count = usize::try_from(self.uow.count::<E>(spec)?).unwrap_or(usize::MAX);
            return Err(RepoError::NonUniqueResult {
                entity: E::KIND.as_str(),
                count,
            });
        }
        Ok(rows.pop())
    }

    fn find_page(
        &self,
        spec: &Specification<E::Field>,
        request: &PageRequest<E::Field>,
    ) -> RepoResult<Page<E>> {
        let content = self.uow.query(spec, request.sort(), page_window(request))?;
        let total = self.uow.count::<E>(spec)?;
        Ok(Page::new(content, request.page(), request.size(), total))
    }

    fn find_slice(
        &self,
        spec: &Specification<E::Field>,
        request: &PageRequest<E::Field>,
    ) -> RepoResult<Slice<E>> {
        let window = Window::new(request.offset(), u64::from(request.size()) + 1);
        let rows = self.uow.query(spec, request.sort(), window)?;
        Ok(Slice::from_overfetch(rows, request.page(), request.size()))
    }

    fn count_matching(&self, spec: &Specification<E::Field>) -> RepoResult<u64> {
        self.uow.count::<E>(spec)
    }

    fn exists_matching(&self, spec: &Specification<E::Field>) -> RepoResult<bool> {
        Ok(!self
            .uow
            .query_projection::<E, E>(spec, &Sort::unsorted(), Window::new(0, 1))?
            .is_empty())
    }

    fn find_all_by_example(&self, example: &Example<E::Field>) -> RepoResult<Vec<E>> {
        let spec = example.to_specification()?;
        self.find_all_matching(&spec)
    }

    fn update_where(
        &self,
        spec: Specification<E::Field>,
        assignments: Vec<Assignment<E::Field>>,
    ) -> RepoResult<usize> {
        let update = BulkUpdate::new(spec, assignments)?;
        self.uow.bulk_update::<E>(&update)
    }

    fn bulk_update(&self, update: &BulkUpdate<E::Field>) -> RepoResult<usize> {
        self.uow.bulk_update::<E>(update)
    }
}

fn page_window<F: EntityField>(request: &PageRequest<F>) -> Window {
    Window::new(request.offset(), u64::from(request.size()))
}
