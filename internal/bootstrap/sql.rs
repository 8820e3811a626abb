use crate::cluster::spec::{RoleClass, UserSpec};
use crate::cluster::topology::{Dsn, BOOTSTRAP_USER};
use crate::util::config::EngineVersion;

pub const PRIVILEGE_ROLE: &str = "pgedge_superuser";

const PG15_ROLES: &[&str] = &[
    "pg_read_all_data",
    "pg_write_all_data",
    "pg_read_all_settings",
    "pg_read_all_stats",
    "pg_stat_scan_tables",
    "pg_monitor",
    "pg_signal_backend",
    "pg_checkpoint",
];

const PG16_ROLES: &[&str] = &[
    "pg_read_all_data",
    "pg_write_all_data",
    "pg_read_all_settings",
    "pg_read_all_stats",
    "pg_stat_scan_tables",
    "pg_monitor",
    "pg_signal_backend",
    "pg_checkpoint",
    "pg_use_reserved_connections",
    "pg_create_subscription",
];

pub const SUPERUSER_PARAMETERS: &[&str] = &[
    "commit_delay",
    "deadlock_timeout",
    "lc_messages",
    "log_duration",
    "log_error_verbosity",
    "log_executor_stats",
    "log_lock_waits",
    "log_min_duration_sample",
    "log_min_duration_statement",
    "log_min_error_statement",
    "log_min_messages",
    "log_parser_stats",
    "log_planner_stats",
    "log_replication_commands",
    "log_statement",
    "log_statement_sample_rate",
    "log_statement_stats",
    "log_temp_files",
    "log_transaction_sample_rate",
    "pg_stat_statements.track",
    "pg_stat_statements.track_planning",
    "pg_stat_statements.track_utility",
    "session_replication_role",
    "temp_file_limit",
    "track_activities",
    "track_counts",
    "track_functions",
    "track_io_timing",
];

pub const GRANT_SCHEMAS: &[&str] = &["public", "spock", "pg_catalog", "information_schema"];

pub const EXTENSIONS: &[&str] = &["spock", "snowflake", "pg_stat_statements"];

pub const REPLICATION_SETS: &str = "{default, default_insert_only, ddl_sql}";

pub const COUNT_NODES: &str = "SELECT COUNT(*) FROM spock.node";

pub fn privilege_roles(version: EngineVersion) -> &'static [&'static str] {
    match version {
        EngineVersion::Pg15 => PG15_ROLES,
        EngineVersion::Pg16 | EngineVersion::Pg17 => PG16_ROLES,
    }
}

pub fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn create_role_if_missing(name: &str, create: &str) -> String {
    format!(
        "DO $pgedge$\nBEGIN\n    IF NOT EXISTS (SELECT FROM pg_catalog.pg_roles WHERE rolname = {}) THEN\n        {create}\n    END IF;\nEND\n$pgedge$;",
        literal(name)
    )
}

pub fn primary_role_statements(version: EngineVersion, users: &[UserSpec]) -> Vec<String> {
    let mut statements = vec![
        create_role_if_missing(
            PRIVILEGE_ROLE,
            &format!("CREATE ROLE {PRIVILEGE_ROLE} WITH NOLOGIN;"),
        ),
        format!(
            "GRANT {} TO {PRIVILEGE_ROLE} WITH ADMIN OPTION;",
            privilege_roles(version).join(", ")
        ),
        format!(
            "GRANT SET ON PARAMETER {} TO {PRIVILEGE_ROLE};",
            SUPERUSER_PARAMETERS.join(", ")
        ),
    ];
    for user in users {
        statements.extend(user_statements(user));
    }
    statements
}

pub fn user_statements(user: &UserSpec) -> Vec<String> {
    let password = literal(&user.password);
    let name = &user.username;
    if user.is_superuser() {
        return vec![create_role_if_missing(
            name,
            &format!("CREATE USER {name} WITH LOGIN SUPERUSER PASSWORD {password};"),
        )];
    }
    if user.role_class.is_administrative() {
        return vec![
            create_role_if_missing(
                name,
                &format!("CREATE USER {name} WITH LOGIN CREATEROLE CREATEDB PASSWORD {password};"),
            ),
            format!("GRANT {PRIVILEGE_ROLE} TO {name} WITH ADMIN OPTION;"),
        ];
    }
    vec![create_role_if_missing(
        name,
        &format!("CREATE USER {name} WITH LOGIN PASSWORD {password};"),
    )]
}

pub fn create_database(name: &str, owner: &str) -> String {
    format!("CREATE DATABASE {name} OWNER {owner};")
}

pub fn grant_database(database: &str, role: &str) -> String {
    format!("GRANT ALL PRIVILEGES ON DATABASE {database} TO {role};")
}

pub fn database_grants(database: &str, owner: &str) -> Vec<String> {
    vec![
        grant_database(database, owner),
        grant_database(database, BOOTSTRAP_USER),
    ]
}

pub fn elevate_bootstrap_user(password: &str) -> String {
    format!(
        "ALTER USER {BOOTSTRAP_USER} WITH PASSWORD {} LOGIN SUPERUSER REPLICATION;",
        literal(password)
    )
}

// Also terminates other sessions on the seed database.
pub fn seed_teardown(dbname: &str, username: &str) -> Vec<String> {
    vec![
        format!("DROP DATABASE IF EXISTS {dbname} WITH (FORCE);"),
        format!("DROP USER IF EXISTS {username};"),
    ]
}

pub fn create_extensions() -> Vec<String> {
    EXTENSIONS
        .iter()
        .map(|name| format!("CREATE EXTENSION IF NOT EXISTS {name};"))
        .collect()
}

pub fn pooler_grants(users: &[UserSpec]) -> Vec<String> {
    users
        .iter()
        .filter(|user| user.role_class == RoleClass::PoolerAuth)
        .map(|user| format!("GRANT SELECT ON pg_shadow TO {};", user.username))
        .collect()
}

pub fn user_grants(user: &UserSpec, database: &str, schemas: &[&str]) -> Vec<String> {
    let name = &user.username;
    let mut statements = vec![format!("GRANT CONNECT ON DATABASE {database} TO {name};")];
    if user.role_class.is_read_only() {
        for schema in schemas {
            statements.push(format!("GRANT USAGE ON SCHEMA {schema} TO {name};"));
            statements.push(format!(
                "GRANT SELECT ON ALL TABLES IN SCHEMA {schema} TO {name};"
            ));
            statements.push(format!(
                "ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} GRANT SELECT ON TABLES TO {name};"
            ));
        }
        if user.role_class == RoleClass::InternalReadOnly {
            statements.push(format!("GRANT EXECUTE ON FUNCTION pg_ls_waldir TO {name};"));
            statements.push(format!("GRANT pg_read_all_stats TO {name};"));
        }
        return statements;
    }
    for schema in schemas {
        statements.push(format!("GRANT USAGE, CREATE ON SCHEMA {schema} TO {name};"));
        statements.push(format!(
            "GRANT ALL PRIVILEGES ON ALL TABLES IN SCHEMA {schema} TO {name};"
        ));
        statements.push(format!(
            "GRANT ALL PRIVILEGES ON ALL SEQUENCES IN SCHEMA {schema} TO {name};"
        ));
        statements.push(format!(
            "ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} GRANT ALL PRIVILEGES ON TABLES TO {name};"
        ));
        statements.push(format!(
            "ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} GRANT ALL PRIVILEGES ON SEQUENCES TO {name};"
        ));
    }
    statements
}

pub fn all_user_grants(users: &[UserSpec], database: &str, schemas: &[&str]) -> Vec<String> {
    users
        .iter()
        .flat_map(|user| user_grants(user, database, schemas))
        .collect()
}

pub fn register_node(node_name: &str, dsn: &Dsn) -> String {
    let name = literal(node_name);
    format!(
        "SELECT spock.node_create(node_name := {name}, dsn := {}) WHERE {name} NOT IN (SELECT node_name FROM spock.node);",
        literal(&dsn.to_string())
    )
}

pub fn drop_subscription(name: &str) -> String {
    format!(
        "SELECT spock.sub_drop(subscription_name := {}, ifexists := 'true');",
        literal(name)
    )
}

pub fn create_subscription(name: &str, provider: &Dsn) -> String {
    format!(
        "SELECT spock.sub_create(subscription_name := {}, provider_dsn := {}, replication_sets := {}, forward_origins := '{{}}', synchronize_structure := 'true', synchronize_data := 'true', apply_delay := '0');",
        literal(name),
        literal(&provider.to_string()),
        literal(REPLICATION_SETS)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::spec::Service;

    fn user(name: &str, class: RoleClass) -> UserSpec {
        UserSpec {
            username: name.to_string(),
            password: format!("{name}pw"),
            superuser: None,
            service: Service::Postgres,
            role_class: class,
        }
    }

    #[test]
    fn literal_doubles_quotes() {
        assert_eq!(literal("plain"), "'plain'");
        assert_eq!(literal("o'brien"), "'o''brien'");
    }

    #[test]
    fn newer_engines_delegate_more_roles() {
        assert_eq!(privilege_roles(EngineVersion::Pg15).len(), 8);
        let pg16 = privilege_roles(EngineVersion::Pg16);
        assert_eq!(pg16.len(), 10);
        assert!(pg16.contains(&"pg_create_subscription"));
        assert_eq!(privilege_roles(EngineVersion::Pg17), pg16);
        assert!(!privilege_roles(EngineVersion::Pg15).contains(&"pg_create_subscription"));
        assert_eq!(SUPERUSER_PARAMETERS.len(), 28);
    }

    #[test]
    fn role_setup_is_guarded() {
        let statements = primary_role_statements(EngineVersion::Pg15, &[]);
        assert_eq!(statements.len(), 3);
        assert!(statements[0].contains("IF NOT EXISTS"));
        assert!(statements[0].contains("rolname = 'pgedge_superuser'"));
        assert!(statements[0].contains("CREATE ROLE pgedge_superuser WITH NOLOGIN;"));
        assert!(statements[1].starts_with("GRANT pg_read_all_data, pg_write_all_data"));
        assert!(statements[1].ends_with("TO pgedge_superuser WITH ADMIN OPTION;"));
        assert!(statements[2].contains("track_io_timing TO pgedge_superuser;"));
    }

    #[test]
    fn users_get_attributes_by_class() {
        let admin = user_statements(&user("admin1", RoleClass::Admin));
        assert_eq!(admin.len(), 2);
        assert!(admin[0].contains("CREATE USER admin1 WITH LOGIN CREATEROLE CREATEDB PASSWORD 'admin1pw';"));
        assert_eq!(admin[1], "GRANT pgedge_superuser TO admin1 WITH ADMIN OPTION;");

        let internal = user_statements(&user("ops", RoleClass::InternalAdmin));
        assert_eq!(internal.len(), 2);

        let app = user_statements(&user("app", RoleClass::Application));
        assert_eq!(app.len(), 1);
        assert!(app[0].contains("CREATE USER app WITH LOGIN PASSWORD 'apppw';"));

        let mut root = user("root", RoleClass::Application);
        root.superuser = Some(true);
        let root = user_statements(&root);
        assert!(root[0].contains("WITH LOGIN SUPERUSER PASSWORD 'rootpw';"));
    }

    #[test]
    fn read_only_users_get_select_only() {
        let grants = user_grants(&user("reader", RoleClass::ApplicationReadOnly), "main", &["public"]);
        assert_eq!(
            grants,
            vec![
                "GRANT CONNECT ON DATABASE main TO reader;",
                "GRANT USAGE ON SCHEMA public TO reader;",
                "GRANT SELECT ON ALL TABLES IN SCHEMA public TO reader;",
                "ALTER DEFAULT PRIVILEGES IN SCHEMA public GRANT SELECT ON TABLES TO reader;",
            ]
        );
        let internal = user_grants(&user("mon", RoleClass::InternalReadOnly), "main", GRANT_SCHEMAS);
        assert_eq!(internal.len(), 1 + 3 * GRANT_SCHEMAS.len() + 2);
        assert_eq!(internal.last().map(String::as_str), Some("GRANT pg_read_all_stats TO mon;"));
    }

    #[test]
    fn writers_get_full_schema_privileges() {
        let grants = user_grants(&user("app", RoleClass::Application), "analytics", GRANT_SCHEMAS);
        assert_eq!(grants.len(), 1 + 5 * GRANT_SCHEMAS.len());
        assert!(grants.contains(&"GRANT USAGE, CREATE ON SCHEMA spock TO app;".to_string()));
        assert!(grants.contains(
            &"ALTER DEFAULT PRIVILEGES IN SCHEMA public GRANT ALL PRIVILEGES ON SEQUENCES TO app;"
                .to_string()
        ));
    }

    #[test]
    fn pooler_auth_users_can_read_shadow() {
        let users = vec![user("app", RoleClass::Application), user("cat", RoleClass::PoolerAuth)];
        assert_eq!(pooler_grants(&users), vec!["GRANT SELECT ON pg_shadow TO cat;"]);
    }

    #[test]
    fn node_registration_is_guarded_by_name() {
        let dsn = Dsn::new("h1", "main", "pgedge", 5432).with_password(Some("pw"));
        assert_eq!(
            register_node("n1", &dsn),
            "SELECT spock.node_create(node_name := 'n1', dsn := 'host=h1 dbname=main user=pgedge port=5432 password=pw') WHERE 'n1' NOT IN (SELECT node_name FROM spock.node);"
        );
    }

    #[test]
    fn subscription_calls_name_the_provider() {
        assert_eq!(
            drop_subscription("sub_main_n1_n2"),
            "SELECT spock.sub_drop(subscription_name := 'sub_main_n1_n2', ifexists := 'true');"
        );
        let create = create_subscription(
            "sub_main_n1_n2",
            &Dsn::new("h2", "main", "pgedge", 5432),
        );
        assert!(create.starts_with("SELECT spock.sub_create(subscription_name := 'sub_main_n1_n2', provider_dsn := 'host=h2 dbname=main user=pgedge port=5432'"));
        assert!(create.contains("replication_sets := '{default, default_insert_only, ddl_sql}'"));
        assert!(create.contains("forward_origins := '{}'"));
        assert!(create.ends_with("apply_delay := '0');"));
    }

    #[test]
    fn seed_teardown_is_idempotent() {
        assert_eq!(
            seed_teardown("init", "inituser"),
            vec![
                "DROP DATABASE IF EXISTS init WITH (FORCE);",
                "DROP USER IF EXISTS inituser;",
            ]
        );
    }
}
