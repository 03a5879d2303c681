use crucible::core::{ErrorCategory, ResourceLimits, SecurityValidator};

fn validator() -> SecurityValidator {
    SecurityValidator::new(&ResourceLimits::default(), &[]).unwrap()
}

#[test]
fn test_denylisted_imports_are_rejected() {
    for program in [
        r#"import "os" as os;"#,
        r#"import "subprocess" as sp;"#,
        "import os",
        r#"let data = 1; import "net" as net; data"#,
    ] {
        let err = validator().validate(program).unwrap_err();
        assert_eq!(
            err.category,
            ErrorCategory::SecurityViolation,
            "program: {}",
            program
        );
    }
}

#[test]
fn test_dynamic_evaluation_primitives_are_rejected() {
    for program in [
        r#"eval("1 + 1")"#,
        r#"let cmd = system("ls");"#,
        r#"exec("print(1)")"#,
    ] {
        let err = validator().validate(program).unwrap_err();
        assert_eq!(
            err.category,
            ErrorCategory::SecurityViolation,
            "program: {}",
            program
        );
    }
}

#[test]
fn test_capability_module_references_are_rejected() {
    let err = validator().validate("let home = os.home_dir();").unwrap_err();
    assert_eq!(err.category, ErrorCategory::SecurityViolation);
    assert!(err.message.contains("os"));
}

#[test]
fn test_reserved_identifier_cannot_be_mutated() {
    let err = validator().validate("__runtime__ = #{};").unwrap_err();
    assert_eq!(err.category, ErrorCategory::SecurityViolation);
    assert!(err.message.contains("__runtime__"));
}

#[test]
fn test_reading_reserved_identifier_is_allowed() {
    validator().validate("print(__runtime__);").unwrap();
}

#[test]
fn test_syntax_errors_are_distinct_from_violations() {
    let err = validator().validate("let x = ").unwrap_err();
    assert_eq!(err.category, ErrorCategory::ValidationError);
}

#[test]
fn test_validation_has_no_side_effects() {
    // Validation must not execute the program: a benign program with a
    // print statement validates cleanly and nothing is evaluated.
    let v = validator();
    for _ in 0..3 {
        v.validate("print(42);").unwrap();
    }
}

#[test]
fn test_allow_file_io_relaxes_file_modules_only() {
    let limits = ResourceLimits {
        allow_file_io: true,
        ..ResourceLimits::default()
    };
    let v = SecurityValidator::new(&limits, &[]).unwrap();
    v.validate("let fs = #{read: 1}; let x = fs.read;").unwrap();
    assert!(v.validate("let x = socket.open();").is_err());
}

#[test]
fn test_extra_allowlist_for_trusted_deployments() {
    let v = SecurityValidator::new(
        &ResourceLimits::default(),
        &["reflect".to_string()],
    )
    .unwrap();
    v.validate("let reflect = #{fields: []}; reflect.fields")
        .unwrap();
}
