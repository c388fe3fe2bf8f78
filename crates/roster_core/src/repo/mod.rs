//! Repository contracts and their SQLite implementation.
//!
//! # Responsibility
//! - Define typed CRUD and specification-query contracts per entity.
//! - Keep unit-of-work and SQL details behind those contracts.
//!
//! # Invariants
//! - Writes call `Entity::validate()` before anything is queued.
//! - Lookups by id report absence as `Ok(None)`; `NotFound` is reserved for
//!   mandatory single results and deletes of absent ids.

pub mod member_repo;
pub mod member_spec;
mod sqlite_repo;
pub mod team_repo;

pub use member_repo::MemberRepository;
pub use member_spec::MemberSpec;
pub use sqlite_repo::SqliteRepository;
pub use team_repo::TeamRepository;

use crate::error::RepoResult;
use crate::model::Entity;
use crate::query::{
    Assignment, BulkUpdate, Example, Page, PageRequest, Slice, Sort, Specification,
};

/// Typed CRUD over one entity type.
pub trait Repository<E: Entity> {
    /// Assigns an id when missing, then inserts or replaces the stored entity.
    fn save(&self, entity: E) -> RepoResult<E>;

    fn find_by_id(&self, id: E::Id) -> RepoResult<Option<E>>;

    /// Reads storage directly; the result is not tracked by the unit of work.
    fn find_read_only_by_id(&self, id: E::Id) -> RepoResult<Option<E>>;

    /// Entities for the ids that exist, ordered by id.
    fn find_all_by_ids(&self, ids: &[E::Id]) -> RepoResult<Vec<E>>;

    fn exists_by_id(&self, id: E::Id) -> RepoResult<bool>;

    /// Every entity, ordered by id.
    fn find_all(&self) -> RepoResult<Vec<E>>;

    fn find_all_sorted(&self, sort: &Sort<E::Field>) -> RepoResult<Vec<E>>;

    fn count(&self) -> RepoResult<u64>;

    /// Fails with `NotFound` when `entity` has no id or is not stored.
    fn delete(&self, entity: &E) -> RepoResult<()>;

    fn delete_by_id(&self, id: E::Id) -> RepoResult<()>;
}

/// Specification-driven reads and set-based updates.
pub trait SpecificationExecutor<E: Entity> {
    fn find_all_matching(&self, spec: &Specification<E::Field>) -> RepoResult<Vec<E>>;

    fn find_all_matching_sorted(
        &self,
        spec: &Specification<E::Field>,
        sort: &Sort<E::Field>,
    ) -> RepoResult<Vec<E>>;

    /// `Ok(None)` for no match, `NonUniqueResult` for more than one.
    fn find_one(&self, spec: &Specification<E::Field>) -> RepoResult<Option<E>>;

    fn find_page(
        &self,
        spec: &Specification<E::Field>,
        request: &PageRequest<E::Field>,
    ) -> RepoResult<Page<E>>;

    /// Like [`SpecificationExecutor::find_page`] without the count query.
    fn find_slice(
        &self,
        spec: &Specification<E::Field>,
        request: &PageRequest<E::Field>,
    ) -> RepoResult<Slice<E>>;

    fn count_matching(&self, spec: &Specification<E::Field>) -> RepoResult<u64>;

    fn exists_matching(&self, spec: &Specification<E::Field>) -> RepoResult<bool>;

    fn find_all_by_example(&self, example: &Example<E::Field>) -> RepoResult<Vec<E>>;

    /// Applies every assignment to each matching row; returns the row count.
    fn update_where(
        &self,
        spec: Specification<E::Field>,
        assignments: Vec<Assignment<E::Field>>,
    ) -> RepoResult<usize>;

    /// [`SpecificationExecutor::update_where`] with a per-call cache policy.
    fn bulk_update(&self, update: &BulkUpdate<E::Field>) -> RepoResult<usize>;
}
