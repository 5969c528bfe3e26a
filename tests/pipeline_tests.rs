use pgshadow::candidate::key::CandidateKey;
use pgshadow::candidate::override_fn::OverrideCandidate;
use pgshadow::deploy::ledger::parse_drop_script;
use pgshadow::error::SessionError;
use pgshadow::harness::detector::{InvocationDetector, MarkerTableDetector, Observation};
use pgshadow::pipeline::cancel::CancelFlag;
use pgshadow::pipeline::config::{CollisionPolicy, RunConfig};
use pgshadow::pipeline::outcome::RunOutcome;
use pgshadow::pipeline::run::Pipeline;
use pgshadow::resolution::types::ConversionTable;
use pgshadow::resolution::variants::Signature;
use pgshadow::session::Session;

mod support;

use support::{catalog_row, FakeSession};

const PAYLOAD: &str = "ALTER USER mallory WITH SUPERUSER";

fn config() -> RunConfig {
    RunConfig {
        payload: PAYLOAD.to_string(),
        ..RunConfig::default()
    }
}

/// `(integer)` expands only to `(bigint)`, `(text)` only to `(varchar)`.
fn narrow_pipeline(config: RunConfig) -> Pipeline {
    Pipeline::new(config).with_conversions(Box::new(ConversionTable::from_pairs([
        ("integer", vec!["bigint"]),
        ("text", vec!["varchar"]),
    ])))
}

fn two_function_catalog() -> FakeSession {
    FakeSession::with_catalog(
        "mallory",
        &[
            catalog_row("scaled", &["integer"], "integer"),
            catalog_row("masked", &["text"], "text"),
        ],
    )
}

fn key(name: &str, ty: &str) -> CandidateKey {
    CandidateKey::new("public", name, Signature::new([ty]))
}

#[test]
fn existing_overrides_are_skipped_and_reported_as_collisions() {
    let mut session = two_function_catalog()
        .existing(r#"public."scaled"(bigint)"#)
        .existing(r#"public."masked"(character varying)"#);

    let report = narrow_pipeline(RunConfig {
        collision: CollisionPolicy::Skip,
        ..config()
    })
    .run(&mut session)
    .expect("collisions are not fatal");

    assert_eq!(report.candidates.len(), 2);
    assert_eq!(
        report.collisions,
        vec![key("scaled", "bigint"), key("masked", "varchar")]
    );
    assert_eq!(
        report
            .error_log
            .iter()
            .filter(|line| line.starts_with("Collision:"))
            .count(),
        2
    );
    assert!(report.deployed.is_empty());
    assert_eq!(report.drop_script(), "");
    assert!(report.candidates.iter().all(|c| c.state == "skipped"));
    assert_eq!(session.position("CREATE"), None, "existing bodies untouched");
}

#[test]
fn abort_policy_stops_before_any_mutation() {
    let mut session = two_function_catalog().existing(r#"public."masked"(character varying)"#);

    let report = narrow_pipeline(RunConfig {
        collision: CollisionPolicy::Abort,
        ..config()
    })
    .run(&mut session)
    .expect("collisions are not fatal");

    assert_eq!(
        report.outcome,
        RunOutcome::AbortedOnCollision(key("masked", "varchar"))
    );
    assert_eq!(report.outcome.exit_code(), 1);
    assert_eq!(session.position("CREATE"), None);
    assert_eq!(session.position("DROP"), None);
}

#[test]
fn overwrite_policy_notes_the_replacement_and_keeps_going() {
    let scaled = key("scaled", "bigint");
    let mut session = two_function_catalog()
        .existing(r#"public."scaled"(bigint)"#)
        .proxy_hit(&scaled.tag());

    let report = narrow_pipeline(config())
        .run(&mut session)
        .expect("run completes");

    assert!(report
        .test_log
        .contains(&format!("{scaled} already exists and will be replaced")));
    assert!(report.collisions.is_empty());
    assert_eq!(report.deployed, vec![scaled]);
    assert!(session
        .matching("EXECUTE 'ALTER USER mallory WITH SUPERUSER'")
        .iter()
        .all(|sql| sql.starts_with("CREATE OR REPLACE FUNCTION")));
}

const KEPT_BODY: &str = "CREATE OR REPLACE FUNCTION public.scaled(bigint)\n \
                         RETURNS integer\n LANGUAGE sql\n IMMUTABLE\n\
                         AS $function$SELECT ($1 * 2)::integer$function$\n";

fn scaled_only_catalog() -> FakeSession {
    FakeSession::with_catalog(
        "mallory",
        &[catalog_row("scaled", &["integer"], "integer")],
    )
    .existing_with_definition(r#"public."scaled"(bigint)"#, KEPT_BODY)
}

#[test]
fn inert_overwrites_put_the_previous_definition_back() {
    let mut session = scaled_only_catalog();

    let report = narrow_pipeline(config())
        .run(&mut session)
        .expect("run completes");

    assert_eq!(report.outcome, RunOutcome::NoExploitable);
    let read = session
        .position("pg_get_functiondef")
        .expect("definition captured");
    let install = session
        .position(r#"CREATE OR REPLACE FUNCTION public."scaled"(bigint)"#)
        .expect("test function installed");
    let restore = session.position(KEPT_BODY).expect("definition restored");
    assert!(read < install && install < restore);
    assert_eq!(session.position("DROP FUNCTION"), None, "an overwrite is never dropped");
    assert!(report.ledger.is_empty());
}

#[test]
fn deployed_overwrites_roll_back_to_the_previous_definition() {
    let scaled = key("scaled", "bigint");
    let mut session = scaled_only_catalog().proxy_hit(&scaled.tag());

    let report = narrow_pipeline(config())
        .run(&mut session)
        .expect("run completes");

    assert_eq!(report.deployed, vec![scaled]);
    assert_eq!(report.drop_script(), format!("{};\n", KEPT_BODY.trim_end()));
    let statements = parse_drop_script(&report.drop_script()).expect("rollback script parses");
    assert_eq!(statements, vec![KEPT_BODY.trim_end().to_string()]);
}

#[test]
fn unreadable_existing_definitions_are_not_overwritten() {
    let mut session = scaled_only_catalog().fail_on(
        "pg_get_functiondef",
        SessionError::Statement("\"scaled\" is an aggregate function".to_string()),
    );

    let report = narrow_pipeline(config())
        .run(&mut session)
        .expect("run completes");

    assert_eq!(report.candidates[0].state, "error");
    assert!(report.error_log.iter().any(|line| line
        .starts_with("Exception reading existing definition of public.scaled(bigint)")));
    assert_eq!(session.position("CREATE"), None);
}

#[test]
fn probe_timeout_is_inert_and_nothing_is_deployed() {
    let mut session = FakeSession::with_catalog(
        "mallory",
        &[catalog_row("masked", &["text"], "text")],
    );

    let report = narrow_pipeline(config())
        .with_detector(Box::new(MarkerTableDetector::new(
            std::time::Duration::ZERO,
            std::time::Duration::ZERO,
        )))
        .run(&mut session)
        .expect("run completes");

    assert_eq!(report.outcome, RunOutcome::NoExploitable);
    assert_eq!(report.outcome.to_string(), "no exploitable functions found");
    assert!(report.exploitable.is_empty());
    assert!(report.deployed.is_empty());
    assert_eq!(report.exploitables_sql(), "");
    assert!(report
        .test_log
        .contains(&"no exploitable functions found".to_string()));
    assert!(session.matching("ALTER USER").is_empty());
    assert_eq!(report.candidates[0].state, "tested: inert");
}

#[test]
fn only_exploitable_candidates_are_deployed_after_their_checks() {
    let masked = key("masked", "varchar");
    let mut session = two_function_catalog().proxy_hit(&masked.tag());

    let report = narrow_pipeline(config())
        .run(&mut session)
        .expect("run completes");

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.exploitable, vec![masked.clone()]);
    assert_eq!(report.deployed, vec![masked.clone()]);

    let check = session
        .position(r#"to_regprocedure('public."masked"(character varying)')"#)
        .expect("existence check ran");
    let verdict = session
        .position(&format!("current_setting('pgshadow.probe_{}'", masked.tag()))
        .expect("marker read");
    let exploit = session
        .position("EXECUTE 'ALTER USER mallory WITH SUPERUSER'")
        .expect("exploit created");
    assert!(check < verdict && verdict < exploit);

    // Every existence check precedes every mutation.
    let last_check = session
        .log
        .iter()
        .rposition(|sql| sql.contains("to_regprocedure"))
        .expect("checks ran");
    let first_create = session.position("CREATE").expect("something was created");
    assert!(last_check < first_create);

    assert_eq!(
        session.matching("EXECUTE 'ALTER USER").len(),
        1,
        "the inert candidate is never deployed"
    );
    assert_eq!(
        report.exploitables_sql(),
        "SELECT \"masked\"(NULL::character varying);\n"
    );
}

#[test]
fn drop_script_has_one_statement_per_deployed_candidate() {
    let mut session = two_function_catalog();

    let report = narrow_pipeline(RunConfig {
        run_tests: false,
        ..config()
    })
    .run(&mut session)
    .expect("run completes");

    assert_eq!(
        report.deployed,
        vec![key("scaled", "bigint"), key("masked", "varchar")]
    );
    assert!(report.test_log.contains(&"tests skipped".to_string()));
    assert_eq!(
        report.drop_script(),
        "DROP FUNCTION IF EXISTS public.\"scaled\"(bigint);\n\
         DROP FUNCTION IF EXISTS public.\"masked\"(character varying);\n"
    );
    let statements = parse_drop_script(&report.drop_script()).expect("drop script parses");
    assert_eq!(statements.len(), report.deployed.len());
}

#[test]
fn deployment_failures_are_logged_and_the_rest_still_deploys() {
    let mut session = two_function_catalog().fail_on(
        r#"CREATE OR REPLACE FUNCTION public."scaled"(bigint)"#,
        SessionError::Statement("permission denied for schema public".to_string()),
    );

    let report = narrow_pipeline(RunConfig {
        run_tests: false,
        ..config()
    })
    .run(&mut session)
    .expect("statement errors are not fatal");

    assert_eq!(report.deployed, vec![key("masked", "varchar")]);
    assert_eq!(report.error_log.len(), 1);
    assert!(report.error_log[0].starts_with(
        "Exception creating exploit function public.scaled(bigint):"
    ));
    assert_eq!(
        report.drop_script(),
        "DROP FUNCTION IF EXISTS public.\"masked\"(character varying);\n"
    );
}

#[test]
fn exploit_creation_can_be_disabled() {
    let masked = key("masked", "varchar");
    let mut session = two_function_catalog().proxy_hit(&masked.tag());

    let report = narrow_pipeline(RunConfig {
        create_exploits: false,
        ..config()
    })
    .run(&mut session)
    .expect("run completes");

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.exploitable, vec![masked]);
    assert!(report.deployed.is_empty());
    assert!(session.matching("ALTER USER").is_empty());
    assert!(report.ledger.is_empty());
}

#[test]
fn connection_loss_aborts_with_a_partial_report() {
    let mut session = two_function_catalog().fail_on(
        r#"CREATE OR REPLACE FUNCTION public."masked"(character varying)"#,
        SessionError::Connection("terminating connection due to administrator command".to_string()),
    );

    let aborted = narrow_pipeline(RunConfig {
        run_tests: false,
        ..config()
    })
    .run(&mut session)
    .expect_err("connection loss is fatal");

    assert!(aborted.error.is_fatal());
    let report = aborted.report;
    assert!(matches!(report.outcome, RunOutcome::Failed(_)));
    assert_eq!(report.outcome.exit_code(), 2);
    assert_eq!(report.deployed, vec![key("scaled", "bigint")]);
    assert_eq!(
        report.drop_script(),
        "DROP FUNCTION IF EXISTS public.\"scaled\"(bigint);\n"
    );
    assert!(report
        .error_log
        .last()
        .is_some_and(|line| line.starts_with("Run aborted:")));
}

#[test]
fn preset_cancellation_interrupts_before_any_mutation() {
    let cancel = CancelFlag::new();
    cancel.cancel();
    let mut session = two_function_catalog();

    let report = narrow_pipeline(config())
        .with_cancel_flag(cancel)
        .run(&mut session)
        .expect("interruption is not an error");

    assert_eq!(report.outcome, RunOutcome::Interrupted);
    assert_eq!(session.position("CREATE"), None);
}

/// Cancels the run while the first probe is being observed.
struct CancelDuringObservation(CancelFlag);

impl InvocationDetector for CancelDuringObservation {
    fn name(&self) -> &'static str {
        "cancelling"
    }

    fn marker(&self, _tag: &str) -> String {
        "PERFORM 1;".to_string()
    }

    fn arm(&mut self, _session: &mut dyn Session, _tag: &str) -> Result<(), SessionError> {
        Ok(())
    }

    fn observe(
        &mut self,
        _session: &mut dyn Session,
        _candidate: &OverrideCandidate,
        cancel: &CancelFlag,
    ) -> Result<Observation, SessionError> {
        self.0.cancel();
        assert!(cancel.is_cancelled());
        Ok(Observation::Interrupted)
    }
}

#[test]
fn cancellation_mid_test_drops_the_probe_and_keeps_artifacts() {
    let cancel = CancelFlag::new();
    let mut session = two_function_catalog();

    let report = narrow_pipeline(config())
        .with_cancel_flag(cancel.clone())
        .with_detector(Box::new(CancelDuringObservation(cancel)))
        .run(&mut session)
        .expect("interruption is not an error");

    assert_eq!(report.outcome, RunOutcome::Interrupted);
    assert_eq!(report.detector, "cancelling");
    assert_eq!(session.matching("CREATE OR REPLACE FUNCTION").len(), 1);
    assert_eq!(session.matching("DROP FUNCTION IF EXISTS").len(), 1);
    assert!(report.ledger.is_empty());
    assert!(report.deployed.is_empty());
}

#[test]
fn overlapping_expansions_are_deduplicated() {
    let mut session = FakeSession::with_catalog(
        "mallory",
        &[
            catalog_row("tag_of", &["text"], "text"),
            catalog_row("tag_of", &["name"], "text"),
        ],
    );

    let report = Pipeline::new(RunConfig {
        create_exploits: false,
        ..config()
    })
    .run(&mut session)
    .expect("run completes");

    let mut keys: Vec<_> = report.candidates.iter().map(|c| c.key.clone()).collect();
    let total = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), total);
    // text -> varchar, character; name -> varchar, character. Neither
    // expansion re-creates the other catalog overload.
    assert_eq!(total, 2);
    assert!(!keys.contains(&key("tag_of", "text")));
    assert!(!keys.contains(&key("tag_of", "name")));
}

#[test]
fn variants_equal_to_a_catalog_overload_are_never_deployed() {
    let mut session = FakeSession::with_catalog(
        "mallory",
        &[
            catalog_row("length", &["text"], "integer"),
            catalog_row("length", &["character"], "integer"),
        ],
    );

    let report = Pipeline::new(RunConfig {
        run_tests: false,
        ..config()
    })
    .run(&mut session)
    .expect("run completes");

    let mut deployed = report.deployed.clone();
    deployed.sort();
    let mut expected = vec![key("length", "varchar"), key("length", "name")];
    expected.sort();
    assert_eq!(deployed, expected);
    assert!(session
        .matching(r#"FUNCTION public."length"(text)"#)
        .is_empty());
    assert!(session
        .matching(r#"FUNCTION public."length"(character)"#)
        .is_empty());
}

#[test]
fn variants_beyond_the_limit_are_not_tried() {
    let mut session = FakeSession::with_catalog(
        "mallory",
        &[catalog_row("left", &["text", "integer"], "text")],
    );

    let report = Pipeline::new(RunConfig {
        max_variants: Some(3),
        create_exploits: false,
        ..config()
    })
    .run(&mut session)
    .expect("run completes");

    assert_eq!(report.candidates.len(), 3);
    let note = "pg_catalog.left(text, integer): 8 of 11 variants not tried (limit 3)";
    assert!(
        report.test_log.iter().any(|line| line == note),
        "log: {:?}",
        report.test_log
    );

    let mut session = FakeSession::with_catalog(
        "mallory",
        &[catalog_row("left", &["text", "integer"], "text")],
    );
    let report = Pipeline::new(RunConfig {
        max_variants: None,
        create_exploits: false,
        ..config()
    })
    .run(&mut session)
    .expect("run completes");
    assert_eq!(report.candidates.len(), 11);
}

#[test]
fn zero_arity_functions_are_opt_in() {
    let catalog = [catalog_row("clock_tick", &[], "bigint")];

    let mut session = FakeSession::with_catalog("mallory", &catalog);
    let report = Pipeline::new(config()).run(&mut session).expect("run completes");
    assert!(report.candidates.is_empty());

    let mut session = FakeSession::with_catalog("mallory", &catalog);
    let report = Pipeline::new(RunConfig {
        include_zero_arity: true,
        create_exploits: false,
        ..config()
    })
    .run(&mut session)
    .expect("run completes");
    assert_eq!(report.candidates.len(), 1);
    assert!(session
        .position(r#"to_regprocedure('public."clock_tick"()')"#)
        .is_some());
}
