//! End-to-end renderer scenarios: block kinds, nesting, scope rules,
//! failure degradation, and the render caches working together.

use std::collections::BTreeMap;
use templar::engine::renderer::{RenderContext, TemplateRenderer};
use templar::engine::value::Value;

fn vars(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn renders_a_realistic_project_readme() {
    let template = "\
# {{ project.name }}

{{#if project.description}}{{ project.description }}{{/if}}

## Features
{{#each features}}- {{this}}{{#unless @last}}\n{{/unless}}{{/each}}

{{#with author}}Maintained by {{name}} <{{email}}>{{/with}}
";

    let mut project = BTreeMap::new();
    project.insert("name".to_string(), Value::Text("templar-demo".into()));
    project.insert(
        "description".to_string(),
        Value::Text("A demo project".into()),
    );
    let mut author = BTreeMap::new();
    author.insert("name".to_string(), Value::Text("Ada".into()));
    author.insert("email".to_string(), Value::Text("ada@example.com".into()));

    let ctx = RenderContext::with_variables(vars(&[
        ("project", Value::Map(project)),
        (
            "features",
            Value::List(vec![
                Value::Text("rendering".into()),
                Value::Text("caching".into()),
            ]),
        ),
        ("author", Value::Map(author)),
    ]));

    let renderer = TemplateRenderer::new();
    let result = renderer.render(template, &ctx);
    assert!(result.ok, "errors: {:?}", result.errors);
    assert!(result.text.contains("# templar-demo"));
    assert!(result.text.contains("- rendering"));
    assert!(result.text.contains("- caching"));
    assert!(result.text.contains("Maintained by Ada <ada@example.com>"));
}

#[test]
fn conditions_can_call_builtin_functions() {
    let template =
        "{{#if version_gte(sdk, \"3.0.0\")}}modern{{else}}legacy{{/if}}";
    let renderer = TemplateRenderer::new();

    let modern = renderer.render(
        template,
        &RenderContext::with_variables(vars(&[("sdk", Value::Text("3.2.0".into()))])),
    );
    assert_eq!(modern.text, "modern");

    let legacy = renderer.render(
        template,
        &RenderContext::with_variables(vars(&[("sdk", Value::Text("2.9.0".into()))])),
    );
    assert_eq!(legacy.text, "legacy");
}

#[test]
fn capability_predicates_drive_conditional_regions() {
    let mut capabilities = BTreeMap::new();
    capabilities.insert("platform".to_string(), Value::Text("web".into()));
    capabilities.insert(
        "features".to_string(),
        Value::List(vec![Value::Text("auth".into())]),
    );

    let template = "\
{{#if platform_is(caps, \"web\")}}web target{{/if}}
{{#if has_feature(caps, \"auth\")}}auth wired{{/if}}
{{#unless has_feature(caps, \"billing\")}}no billing{{/unless}}";

    let renderer = TemplateRenderer::new();
    let result = renderer.render(
        template,
        &RenderContext::with_variables(vars(&[("caps", Value::Map(capabilities))])),
    );
    assert!(result.ok);
    assert!(result.text.contains("web target"));
    assert!(result.text.contains("auth wired"));
    assert!(result.text.contains("no billing"));
}

#[test]
fn deeply_nested_blocks_stay_within_default_limit() {
    // Nine levels deep: inside the default limit of ten.
    let mut template = String::from("core");
    for _ in 0..9 {
        template = format!("{{{{#if on}}}}{}{{{{/if}}}}", template);
    }
    let renderer = TemplateRenderer::new();
    let result = renderer.render(
        &template,
        &RenderContext::with_variables(vars(&[("on", Value::Bool(true))])),
    );
    assert!(result.ok, "errors: {:?}", result.errors);
    assert_eq!(result.text, "core");
}

#[test]
fn runaway_nesting_fails_without_panicking() {
    let mut template = String::from("x");
    for _ in 0..12 {
        template = format!("{{{{#if on}}}}{}{{{{/if}}}}", template);
    }
    let renderer = TemplateRenderer::new();
    let result = renderer.render(
        &template,
        &RenderContext::with_variables(vars(&[("on", Value::Bool(true))])),
    );
    assert!(!result.ok);
    assert!(result.errors.iter().any(|e| e.contains("nesting")));
}

#[test]
fn each_iteration_failures_degrade_to_warnings() {
    // The body references a nested field that only exists on some items.
    let template = "{{#each xs}}[{{this.name}}]{{/each}}";
    let mut good = BTreeMap::new();
    good.insert("name".to_string(), Value::Text("ok".into()));

    let renderer = TemplateRenderer::new();
    let result = renderer.render(
        template,
        &RenderContext::with_variables(vars(&[(
            "xs",
            Value::List(vec![Value::Map(good), Value::Number(7.0)]),
        )])),
    );

    // The render succeeds; the number coerces its missing field to empty.
    assert!(result.ok);
    assert!(result.text.contains("[ok]"));
}

#[test]
fn repeated_renders_hit_the_result_cache() {
    let renderer = TemplateRenderer::new();
    let ctx = RenderContext::with_variables(vars(&[("flag", Value::Bool(true))]));
    let template = "{{#if flag}}cached{{/if}}";

    for _ in 0..5 {
        let result = renderer.render(template, &ctx);
        assert_eq!(result.text, "cached");
    }
    let stats = renderer.result_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 4);
}

#[test]
fn debug_context_attaches_timing() {
    let renderer = TemplateRenderer::new();
    let mut ctx = RenderContext::with_variables(vars(&[("flag", Value::Bool(true))]));
    ctx.debug = true;
    let result = renderer.render("{{#if flag}}x{{/if}}", &ctx);
    let debug = result.debug.expect("debug info requested");
    assert!(!debug.from_cache);
    assert_eq!(debug.blocks, 1);
}
