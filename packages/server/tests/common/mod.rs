//! Shared integration-test harness: one Postgres `testcontainers` instance,
//! reused across every test in the binary so each test only pays the
//! container-startup cost once. Grounded on this workspace's
//! `tests/common/harness.rs` (shared-container + `OnceCell` pattern), trimmed
//! to just Postgres since the Deploy Batcher's KVC is exercised against
//! `fabric_kv::MockKvc` rather than a real Redis in these tests.

use std::sync::Arc;

use server_core::config::{Config, SharedContract};
use server_core::kernel::nca_mock::MockNca;
use server_core::kernel::ServerKernel;
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tokio::sync::OnceCell;

struct SharedInfra {
    db_url: String,
    _postgres: ContainerAsync<GenericImage>,
}

static SHARED_INFRA: OnceCell<SharedInfra> = OnceCell::const_new();

impl SharedInfra {
    async fn init() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = GenericImage::new("postgres", "16")
            .with_wait_for(testcontainers::core::WaitFor::message_on_stderr(
                "database system is ready to accept connections",
            ))
            .with_exposed_port(testcontainers::core::ContainerPort::Tcp(5432))
            .with_env_var("POSTGRES_PASSWORD", "postgres")
            .with_env_var("POSTGRES_USER", "postgres")
            .with_env_var("POSTGRES_DB", "postgres")
            .start()
            .await
            .expect("failed to start postgres container");

        let host = postgres.get_host().await.unwrap();
        let port = postgres.get_host_port_ipv4(5432).await.unwrap();
        let db_url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPool::connect(&db_url)
            .await
            .expect("failed to connect to postgres");
        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .expect("failed to run migrations");

        Self {
            db_url,
            _postgres: postgres,
        }
    }

    async fn get() -> &'static Self {
        SHARED_INFRA.get_or_init(Self::init).await
    }
}

/// A fresh, isolated schema-per-test connection pool against the shared
/// container, plus a [`ServerKernel`] wired to a [`MockNca`] so tests can
/// inject controller failures without a real fabric.
pub struct TestHarness {
    pub db: PgPool,
    pub nca: Arc<MockNca>,
    pub kernel: ServerKernel,
}

pub fn test_config() -> Config {
    Config {
        database_url: String::new(),
        redis_url: String::new(),
        port: 0,
        fabric: "fab1".to_string(),
        vrf: "vrf1".to_string(),
        security_group_network: "default-network".to_string(),
        contract_name_prefix: "hpc".to_string(),
        shared_contracts: vec![SharedContract {
            dst_group_name: "shared-services".to_string(),
            contract_name: "shared-services-contract".to_string(),
        }],
        provision_timeout: std::time::Duration::from_secs(10),
        deprovision_timeout: std::time::Duration::from_secs(10),
        nca_base_url: "http://localhost".to_string(),
        nca_api_token: "test-token".to_string(),
        sweep_interval: std::time::Duration::from_secs(60),
    }
}

impl TestHarness {
    /// Connect to the shared container and run each test's body inside a
    /// fresh, isolated schema so tests never see each other's rows.
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let infra = SharedInfra::get().await;
        let schema = format!("test_{}", uuid::Uuid::new_v4().simple());

        let admin_pool = PgPool::connect(&infra.db_url).await.unwrap();
        sqlx::query(&format!("CREATE SCHEMA \"{schema}\""))
            .execute(&admin_pool)
            .await
            .unwrap();

        let db_url = format!("{}?options=-csearch_path%3D{}", infra.db_url, schema);
        let db = PgPool::connect(&db_url).await.unwrap();
        sqlx::migrate!("../../migrations").run(&db).await.unwrap();

        let nca = Arc::new(MockNca::new());
        nca.seed_vlan(&config.fabric, &config.security_group_network, "100");

        let config = Arc::new(config);
        let kernel = ServerKernel::new(db.clone(), nca.clone(), None, config);

        Self { db, nca, kernel }
    }

    /// Insert a switch, a switch port on it, and a compute node mapped to
    /// that port, returning the node's name (the identifier `Provision`
    /// callers use, per §4.1.2.a "matching either name or hostname").
    pub async fn seed_node(&self, name: &str, serial: &str, interface: &str) -> String {
        sqlx::query("INSERT INTO switches (serial_number) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(serial)
            .execute(&self.db)
            .await
            .unwrap();

        let switch_port_id: uuid::Uuid = sqlx::query_scalar(
            "INSERT INTO switch_ports (switch_serial, interface_name) VALUES ($1, $2) RETURNING id",
        )
        .bind(serial)
        .bind(interface)
        .fetch_one(&self.db)
        .await
        .unwrap();

        let node_id: uuid::Uuid = sqlx::query_scalar(
            "INSERT INTO compute_nodes (name, hostname) VALUES ($1, $2) RETURNING id",
        )
        .bind(name)
        .bind(format!("{name}.cluster.internal"))
        .fetch_one(&self.db)
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO compute_node_port_mappings (compute_node_id, switch_port_id, interface_role) VALUES ($1, $2, NULL)",
        )
        .bind(node_id)
        .bind(switch_port_id)
        .execute(&self.db)
        .await
        .unwrap();

        name.to_string()
    }
}
