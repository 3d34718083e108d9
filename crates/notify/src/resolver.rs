use std::sync::Arc;

use thiserror::Error;

use reqflow_core::domain::org::{EmployeeId, OrgManager};
use reqflow_db::repositories::{OrgDirectory, RepositoryError};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("organization lookup failed: {0}")]
    Directory(#[from] RepositoryError),
}

/// Outcome of walking employee → cost center → managers.
///
/// `NoneAvailable` covers both a missing cost-center assignment and a cost
/// center with no managers: either way the requisition has no approver and
/// the admin escalation policy applies. A storage failure is NOT collapsed
/// into this; it surfaces as `ResolveError`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ManagerResolution {
    Managers(Vec<OrgManager>),
    NoneAvailable,
}

/// Walks the organizational hierarchy for the dispatch engine.
pub struct RecipientResolver {
    directory: Arc<dyn OrgDirectory>,
}

impl RecipientResolver {
    pub fn new(directory: Arc<dyn OrgDirectory>) -> Self {
        Self { directory }
    }

    pub async fn managers_for_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<ManagerResolution, ResolveError> {
        let Some(cost_center) = self.directory.cost_center_of(employee_id).await? else {
            return Ok(ManagerResolution::NoneAvailable);
        };

        let managers = self.directory.managers_of(&cost_center).await?;
        if managers.is_empty() {
            return Ok(ManagerResolution::NoneAvailable);
        }

        Ok(ManagerResolution::Managers(managers))
    }

    /// True iff the employee holds approval authority anywhere in the org.
    /// Used to keep a manager from being asked to approve their own
    /// submission.
    pub async fn has_approval_authority(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<bool, ResolveError> {
        Ok(self.directory.is_manager(employee_id).await?)
    }

    pub async fn admins(&self) -> Result<Vec<OrgManager>, ResolveError> {
        Ok(self.directory.admins().await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqflow_core::domain::org::{EmployeeId, OrgRole};
    use reqflow_db::repositories::InMemoryOrgDirectory;

    use super::{ManagerResolution, RecipientResolver};

    async fn directory() -> Arc<InMemoryOrgDirectory> {
        let directory = Arc::new(InMemoryOrgDirectory::default());
        directory.add_employee("U1", "CC1", "Riley Park").await;
        directory.add_employee("U2", "CC9", "Sam Otieno").await;
        directory.add_manager("M1", "CC1", "m1@example.test", OrgRole::Manager).await;
        directory.add_manager("M2", "CC1", "m2@example.test", OrgRole::Manager).await;
        directory.add_manager("A1", "HQ", "a1@example.test", OrgRole::Admin).await;
        directory
    }

    #[tokio::test]
    async fn resolves_managers_through_the_cost_center() {
        let resolver = RecipientResolver::new(directory().await);

        let resolution = resolver
            .managers_for_employee(&EmployeeId("U1".to_string()))
            .await
            .expect("resolution");

        let ManagerResolution::Managers(managers) = resolution else {
            panic!("expected managers for CC1");
        };
        assert_eq!(managers.len(), 2);
    }

    #[tokio::test]
    async fn empty_manager_list_resolves_to_none_available() {
        let resolver = RecipientResolver::new(directory().await);

        let resolution = resolver
            .managers_for_employee(&EmployeeId("U2".to_string()))
            .await
            .expect("resolution");

        assert_eq!(resolution, ManagerResolution::NoneAvailable);
    }

    #[tokio::test]
    async fn missing_cost_center_resolves_to_none_available() {
        let resolver = RecipientResolver::new(directory().await);

        let resolution = resolver
            .managers_for_employee(&EmployeeId("U-unassigned".to_string()))
            .await
            .expect("a missing assignment is a normal outcome");

        assert_eq!(resolution, ManagerResolution::NoneAvailable);
    }

    #[tokio::test]
    async fn storage_failure_is_surfaced_not_treated_as_no_manager() {
        let directory = directory().await;
        directory.fail_next_lookup().await;
        let resolver = RecipientResolver::new(directory);

        resolver
            .managers_for_employee(&EmployeeId("U1".to_string()))
            .await
            .expect_err("storage failure must propagate");
    }

    #[tokio::test]
    async fn approval_authority_is_independent_of_cost_center() {
        let resolver = RecipientResolver::new(directory().await);

        assert!(resolver
            .has_approval_authority(&EmployeeId("M1".to_string()))
            .await
            .expect("lookup"));
        assert!(!resolver
            .has_approval_authority(&EmployeeId("U1".to_string()))
            .await
            .expect("lookup"));
    }
}
