use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use sheaf::{config::Config, generator::Generator};
use tempfile::TempDir;

fn write_class(root: &Path, relative: &str, body: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

/// A small application library with variant-conditioned graphics classes.
fn write_library(root: &Path) {
    write_class(
        root,
        "class/app/Main.js",
        "// #require(app.core.Base)\n\
         // #use(app.util.Format)\n\
         // #require(app.gfx.Svg?engine:gecko)\n\
         // #require(app.gfx.Vml?engine:mshtml)\n\
         var MAIN = 1;\n",
    );
    write_class(root, "class/app/core/Base.js", "var BASE = 1;\n");
    write_class(root, "class/app/util/Format.js", "var FORMAT = 1;\n");
    write_class(root, "class/app/gfx/Svg.js", "var SVG = 1;\n");
    write_class(root, "class/app/gfx/Vml.js", "var VML = 1;\n");
    write_class(
        root,
        "class/app/editor/Editor.js",
        "// #require(app.core.Base)\nvar EDITOR = 1;\n",
    );
    write_class(root, "class/app/theme/Dark.js", "var DARK = 1;\n");
}

fn job_config(dir: &Path) -> Config {
    let framework = dir.join("framework");
    let build = dir.join("build");
    let raw = format!(
        r#"
            [[library]]
            path = {framework:?}
            namespace = "app"
            uri = "../framework"

            [variants]
            engine = ["gecko", "mshtml"]

            [packages]
            init = "boot"

            [packages.parts]
            boot = ["app.Main"]
            editor = ["app.editor.*"]

            [settings]
            "app.version" = "1.2"

            [compile]
            file = {compile_file:?}

            [source]
            file = {source_file:?}
            format = true
        "#,
        framework = framework.to_string_lossy(),
        compile_file = build.join("app-{engine}.js").to_string_lossy(),
        source_file = build.join("app-{engine}-source.js").to_string_lossy(),
    );
    toml::from_str(&raw).unwrap()
}

#[test]
fn full_pipeline_emits_per_variant_artifacts() {
    let dir = TempDir::new().unwrap();
    write_library(&dir.path().join("framework"));

    let config = job_config(dir.path());
    let generator = Generator::new(
        config,
        IndexMap::new(),
        IndexMap::new(),
        IndexMap::new(),
        IndexMap::new(),
    ).unwrap();
    generator.run().unwrap();

    let build = dir.path().join("build");
    for engine in ["gecko", "mshtml"] {
        // Boot script plus two packages (boot part and editor part).
        assert!(build.join(format!("app-{engine}.js")).is_file());
        assert!(build.join(format!("app-{engine}-0.js")).is_file());
        assert!(build.join(format!("app-{engine}-1.js")).is_file());
        assert!(build.join(format!("app-{engine}-source.js")).is_file());
    }

    // Variant-conditioned edges select exactly one graphics backend.
    let gecko_pkg = fs::read_to_string(build.join("app-gecko-0.js")).unwrap();
    assert!(gecko_pkg.contains("var SVG"));
    assert!(!gecko_pkg.contains("var VML"));
    let mshtml_pkg = fs::read_to_string(build.join("app-mshtml-0.js")).unwrap();
    assert!(mshtml_pkg.contains("var VML"));
    assert!(!mshtml_pkg.contains("var SVG"));

    // Load order: the base class precedes its dependents.
    let base = gecko_pkg.find("var BASE").unwrap();
    let main = gecko_pkg.find("var MAIN").unwrap();
    assert!(base < main);

    // Hint directives are stripped from compiled output.
    assert!(!gecko_pkg.contains("#require"));

    // The editor part rides in its own package.
    let editor_pkg = fs::read_to_string(build.join("app-gecko-1.js")).unwrap();
    assert!(editor_pkg.contains("var EDITOR"));
    assert!(!gecko_pkg.contains("var EDITOR"));
}

#[test]
fn boot_script_carries_settings_variants_and_tables() {
    let dir = TempDir::new().unwrap();
    write_library(&dir.path().join("framework"));

    let config = job_config(dir.path());
    let mut overrides = IndexMap::new();
    overrides.insert("engine".to_owned(), "gecko".to_owned());
    let generator = Generator::new(
        config,
        overrides,
        IndexMap::new(),
        IndexMap::new(),
        IndexMap::new(),
    )
    .unwrap();
    generator.run().unwrap();

    let boot = fs::read_to_string(dir.path().join("build/app-gecko.js")).unwrap();
    assert!(boot.contains("bldsettings[\"app.version\"]=\"1.2\";"));
    assert!(boot.contains("bldvariants[\"engine\"]=\"gecko\";"));
    assert!(boot.contains("\"boot\":[0]"));
    assert!(boot.contains("app-gecko-0.js"));
    assert!(boot.contains("app-gecko-1.js"));

    // The source build references class files rather than packages.
    let source = fs::read_to_string(dir.path().join("build/app-gecko-source.js")).unwrap();
    assert!(source.contains("../framework/app/Main.js"));
    assert!(source.contains("../framework/app/core/Base.js"));
}

#[test]
fn pattern_matching_nothing_aborts_the_run() {
    let dir = TempDir::new().unwrap();
    write_library(&dir.path().join("framework"));

    let raw = format!(
        r#"
            include = ["Foo.*"]

            [[library]]
            path = {framework:?}
            namespace = "app"
        "#,
        framework = dir.path().join("framework").to_string_lossy(),
    );
    let config: Config = toml::from_str(&raw).unwrap();
    let generator = Generator::new(
        config,
        IndexMap::new(),
        IndexMap::new(),
        IndexMap::new(),
        IndexMap::new(),
    ).unwrap();

    let err = generator.run().unwrap_err();
    assert!(err.to_string().contains("Foo.*"), "{err:#}");
}

#[test]
fn missing_package_section_yields_single_boot_package() {
    let dir = TempDir::new().unwrap();
    write_library(&dir.path().join("framework"));
    let build = dir.path().join("build");

    let raw = format!(
        r#"
            include = ["app.Main"]

            [[library]]
            path = {framework:?}
            namespace = "app"

            [compile]
            file = {compile_file:?}
        "#,
        framework = dir.path().join("framework").to_string_lossy(),
        compile_file = build.join("app.js").to_string_lossy(),
    );
    let config: Config = toml::from_str(&raw).unwrap();
    let generator = Generator::new(
        config,
        IndexMap::new(),
        IndexMap::new(),
        IndexMap::new(),
        IndexMap::new(),
    ).unwrap();
    generator.run().unwrap();

    // Even with one package the boot script and the package stay separate
    // files, so the loader never document-writes its own file.
    let boot = fs::read_to_string(build.join("app.js")).unwrap();
    assert!(boot.contains("\"boot\":[0]"));
    assert!(boot.contains("app-0.js"));
    assert!(!boot.contains("/app.js\""));
    assert!(!boot.contains("var MAIN"));

    let package = fs::read_to_string(build.join("app-0.js")).unwrap();
    assert!(package.contains("var MAIN"));
}

#[test]
fn runtime_require_edges_extend_resolution() {
    let dir = TempDir::new().unwrap();
    write_library(&dir.path().join("framework"));
    let build = dir.path().join("build");

    let raw = format!(
        r#"
            include = ["app.Main"]

            [[library]]
            path = {framework:?}
            namespace = "app"

            [compile]
            file = {compile_file:?}
        "#,
        framework = dir.path().join("framework").to_string_lossy(),
        compile_file = build.join("app.js").to_string_lossy(),
    );
    let config: Config = toml::from_str(&raw).unwrap();

    // Nothing in the library references the theme class; only the
    // runtime-supplied edge pulls it in.
    let mut require = IndexMap::new();
    require.insert("app.Main".to_owned(), vec!["app.theme.Dark".to_owned()]);
    let generator = Generator::new(
        config,
        IndexMap::new(),
        IndexMap::new(),
        require,
        IndexMap::new(),
    )
    .unwrap();
    generator.run().unwrap();

    let package = fs::read_to_string(build.join("app-0.js")).unwrap();
    assert!(package.contains("var DARK"));
    // A load dependency precedes its dependent.
    assert!(package.find("var DARK").unwrap() < package.find("var MAIN").unwrap());
}
