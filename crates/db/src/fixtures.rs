use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

const SEED_EMPLOYEE_IDS: &[&str] = &["U1", "U2", "M1"];
const SEED_MANAGER_IDS: &[&str] = &["M1", "M2", "A1", "A2"];

/// Deterministic org-directory seed used by the CLI `seed` command and by
/// end-to-end smoke runs. Covers the three dispatch paths: manager fan-out
/// (CC1), admin escalation (CC9, no managers), and self-approval (M1 is both
/// employee and manager in CC1).
pub struct OrgSeedDataset;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub employees_seeded: usize,
    pub managers_seeded: usize,
}

impl OrgSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/org_seed_data.sql");

    /// Load the seed dataset. Existing seed rows are cleared first so the
    /// load is repeatable.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query("DELETE FROM org_manager")).await?;
        tx.execute(sqlx::query("DELETE FROM org_employee")).await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            employees_seeded: SEED_EMPLOYEE_IDS.len(),
            managers_seeded: SEED_MANAGER_IDS.len(),
        })
    }

    /// Verify the seed rows exist and match the contract counts.
    pub async fn verify(pool: &DbPool) -> Result<bool, RepositoryError> {
        let employee_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM org_employee").fetch_one(pool).await?;
        let manager_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM org_manager").fetch_one(pool).await?;
        let cc9_managers: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM org_manager WHERE cost_center = 'CC9' AND role = 'manager'",
        )
        .fetch_one(pool)
        .await?;

        Ok(employee_count == SEED_EMPLOYEE_IDS.len() as i64
            && manager_count == SEED_MANAGER_IDS.len() as i64
            && cc9_managers == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::OrgSeedDataset;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn seed_loads_and_verifies() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let result = OrgSeedDataset::load(&pool).await.expect("load seeds");
        assert_eq!(result.employees_seeded, 3);
        assert_eq!(result.managers_seeded, 4);

        assert!(OrgSeedDataset::verify(&pool).await.expect("verify seeds"));

        pool.close().await;
    }

    #[tokio::test]
    async fn seed_load_is_repeatable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        OrgSeedDataset::load(&pool).await.expect("first load");
        OrgSeedDataset::load(&pool).await.expect("second load");

        assert!(OrgSeedDataset::verify(&pool).await.expect("verify seeds"));

        pool.close().await;
    }
}
