use sqlx::{sqlite::SqliteRow, Row};

use reqflow_core::domain::org::{CostCenter, EmployeeId, OrgEmployee, OrgManager, OrgRole};

use super::{OrgDirectory, RepositoryError};
use crate::DbPool;

pub struct SqlOrgDirectory {
    pool: DbPool,
}

impl SqlOrgDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn manager_from_row(row: SqliteRow) -> Result<OrgManager, RepositoryError> {
    let role_raw: String = row.try_get("role")?;
    let role = OrgRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown org role `{role_raw}`")))?;

    Ok(OrgManager {
        id: EmployeeId(row.try_get("id")?),
        cost_center: CostCenter(row.try_get("cost_center")?),
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        role,
    })
}

#[async_trait::async_trait]
impl OrgDirectory for SqlOrgDirectory {
    async fn find_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Option<OrgEmployee>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, cost_center, display_name FROM org_employee WHERE id = ?",
        )
        .bind(&employee_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            Ok::<_, RepositoryError>(OrgEmployee {
                id: EmployeeId(row.try_get("id")?),
                cost_center: CostCenter(row.try_get("cost_center")?),
                display_name: row.try_get("display_name")?,
            })
        })
        .transpose()?)
    }

    async fn cost_center_of(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Option<CostCenter>, RepositoryError> {
        let row = sqlx::query("SELECT cost_center FROM org_employee WHERE id = ?")
            .bind(&employee_id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.try_get("cost_center").map(CostCenter)).transpose()?)
    }

    async fn managers_of(
        &self,
        cost_center: &CostCenter,
    ) -> Result<Vec<OrgManager>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, cost_center, email, display_name, role
             FROM org_manager
             WHERE cost_center = ? AND role = 'manager'
             ORDER BY id ASC",
        )
        .bind(&cost_center.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(manager_from_row).collect()
    }

    async fn is_manager(&self, employee_id: &EmployeeId) -> Result<bool, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM org_manager WHERE id = ?")
                .bind(&employee_id.0)
                .fetch_one(&self.pool)
                .await?;

        Ok(count > 0)
    }

    async fn admins(&self) -> Result<Vec<OrgManager>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, cost_center, email, display_name, role
             FROM org_manager
             WHERE role = 'admin'
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(manager_from_row).collect()
    }
}
