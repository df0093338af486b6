//! Tenant database provisioning

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection};
use tracing::info;
use websql_api::{App, DataNode};
use websql_common::{WebsqlError, is_identifier};

/// Creates and drops the schema and database user behind an app
#[async_trait]
pub trait TenantProvisioner: Send + Sync {
    async fn on_app_create_or_update(&self, app: &App, node: &DataNode) -> anyhow::Result<()>;

    async fn on_app_remove(&self, app: &App, node: &DataNode) -> anyhow::Result<()>;
}

/// Provisioner that leaves the database untouched
#[derive(Debug, Default, Clone)]
pub struct NoopProvisioner;

#[async_trait]
impl TenantProvisioner for NoopProvisioner {
    async fn on_app_create_or_update(&self, _app: &App, _node: &DataNode) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_app_remove(&self, _app: &App, _node: &DataNode) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Issues DDL against the data node using its admin credentials
#[derive(Debug, Default, Clone)]
pub struct MySqlProvisioner;

impl MySqlProvisioner {
    fn admin_url(node: &DataNode) -> String {
        format!(
            "mysql://{}:{}@{}:{}/",
            node.username, node.password, node.host, node.port
        )
    }

    async fn admin_connection(node: &DataNode) -> anyhow::Result<DatabaseConnection> {
        Ok(Database::connect(Self::admin_url(node)).await?)
    }

    pub fn create_statements(app: &App) -> anyhow::Result<Vec<String>> {
        check_names(app)?;
        let database = app.database();
        Ok(vec![
            format!(
                "CREATE DATABASE IF NOT EXISTS `{}` DEFAULT CHARACTER SET utf8 COLLATE utf8_unicode_ci",
                database
            ),
            format!(
                "CREATE USER IF NOT EXISTS '{}'@'%' IDENTIFIED BY '{}'",
                app.db_name, app.id
            ),
            format!(
                "GRANT ALL PRIVILEGES ON `{}`.* TO '{}'@'%'",
                database, app.db_name
            ),
        ])
    }

    pub fn remove_statements(app: &App) -> anyhow::Result<Vec<String>> {
        check_names(app)?;
        Ok(vec![
            format!("DROP DATABASE IF EXISTS `{}`", app.database()),
            format!("DROP USER IF EXISTS '{}'@'%'", app.db_name),
        ])
    }

    async fn run(node: &DataNode, statements: Vec<String>) -> anyhow::Result<()> {
        let conn = Self::admin_connection(node).await?;
        for sql in statements {
            conn.execute_unprepared(&sql).await?;
        }
        conn.close().await?;
        Ok(())
    }
}

/// DDL cannot bind identifiers, so they must be plain names
fn check_names(app: &App) -> anyhow::Result<()> {
    if !is_identifier(&app.db_name) || app.db_name.contains('.') {
        return Err(WebsqlError::validation(format!("Invalid database name: {}", app.db_name)).into());
    }
    if !app.id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(WebsqlError::validation(format!("Invalid app id: {}", app.id)).into());
    }
    Ok(())
}

#[async_trait]
impl TenantProvisioner for MySqlProvisioner {
    async fn on_app_create_or_update(&self, app: &App, node: &DataNode) -> anyhow::Result<()> {
        let statements = Self::create_statements(app)?;
        Self::run(node, statements).await?;
        info!(app = %app.name, database = %app.database(), "Tenant database provisioned");
        Ok(())
    }

    async fn on_app_remove(&self, app: &App, node: &DataNode) -> anyhow::Result<()> {
        let statements = Self::remove_statements(app)?;
        Self::run(node, statements).await?;
        info!(app = %app.name, database = %app.database(), "Tenant database dropped");
        Ok(())
    }
}
