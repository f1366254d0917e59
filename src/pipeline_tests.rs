#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use crate::{BuildOptions, Builder, CompileError, ExitHook, Platform};

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn scaffold_project(root: &Path, page_imports: &[&str]) {
        let imports = page_imports
            .iter()
            .map(|p| format!("import \"./{}\";", p))
            .collect::<Vec<_>>()
            .join("\n");
        write(
            root,
            "source/app.js",
            &format!(
                r#"
import React from "@react";
{}

class Global extends React.Component {{
    config = {{
        window: {{ navigationBarTitleText: "demo" }}
    }};
}}

export default Global;
"#,
                imports
            ),
        );
        write(root, "source/ReactWX.js", "// runtime stub\n");
        write(root, "source/ReactAli.js", "// runtime stub\n");
    }

    const INDEX_PAGE: &str = r##"
import React from "@react";
import "./index.scss";

class Index extends React.Component {
    config = { navigationBarTextStyle: "#fff" };

    state = { list: ["a", "b"] };

    handleTap(e) {
        this.setState({ active: e.target });
    }

    render() {
        return (
            <div className="page">
                {this.state.list.map((item, index) => (
                    <span onClick={this.handleTap}>{item}</span>
                ))}
            </div>
        );
    }
}

export default Index;
"##;

    #[tokio::test]
    async fn end_to_end_build_emits_the_coupled_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        scaffold_project(root, &["pages/index"]);
        write(root, "source/pages/index.js", INDEX_PAGE);
        write(root, "source/pages/index.scss", ".page { color: red; }\n");

        let mut builder = Builder::new(BuildOptions::new(root, Platform::Wx));
        let report = builder.build().await.unwrap();

        assert!(report.ok(), "unexpected failures: {}", report.render());

        // The five coupled artifacts of a one-page project.
        let page_script = root.join("dist/pages/index.js");
        let page_template = root.join("dist/pages/index.wxml");
        let page_config = root.join("dist/pages/index.json");
        let page_style = root.join("dist/pages/index.wxss");
        let app_config = root.join("dist/app.json");
        for artifact in [
            &page_script,
            &page_template,
            &page_config,
            &page_style,
            &app_config,
        ] {
            assert!(artifact.exists(), "missing artifact {}", artifact.display());
        }

        let script = std::fs::read_to_string(&page_script).unwrap();
        assert!(script.contains("import React from \"../ReactWX.js\";"));
        assert!(script.contains("Page(React.registerPage(Index, \"pages/index.js\"));"));
        assert!(script.contains("handleTap: function (e)"));
        assert!(!script.contains("index.scss"));

        let template = std::fs::read_to_string(&page_template).unwrap();
        assert!(template.contains("wx:for=\"{{state.list}}\""));
        assert!(template.contains("wx:for-item=\"item\""));
        assert!(template.contains("bindtap=\"dispatchEvent\""));
        assert!(template.contains("class=\"page\""));

        let config: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&page_config).unwrap()).unwrap();
        assert_eq!(config["navigationBarTextStyle"], "white");

        let app: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&app_config).unwrap()).unwrap();
        assert_eq!(app["pages"][0], "pages/index");
        assert_eq!(app["window"]["navigationBarTitleText"], "demo");

        let style = std::fs::read_to_string(&page_style).unwrap();
        assert!(style.contains(".page { color: red; }"));

        // The runtime library is copied next to the outputs.
        assert!(root.join("dist/ReactWX.js").exists());
    }

    #[tokio::test]
    async fn a_broken_unit_fails_the_build_but_not_its_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        scaffold_project(root, &["pages/good", "pages/bad"]);
        write(
            root,
            "source/pages/good.js",
            r#"
import React from "@react";
class Good extends React.Component {
    render() { return <div>fine</div>; }
}
export default Good;
"#,
        );
        write(
            root,
            "source/pages/bad.js",
            r#"
import React from "@react";
class A extends React.Component { render() { return <div />; } }
class B extends React.Component { render() { return <div />; } }
export default A;
"#,
        );

        let mut builder = Builder::new(BuildOptions::new(root, Platform::Wx));
        let report = builder.build().await.unwrap();

        assert!(!report.ok());
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0]
            .source_path
            .ends_with("source/pages/bad.js"));
        assert!(report.render().contains("exactly one component declaration"));

        // Independent resources still emit, supporting incremental fixing.
        assert!(root.join("dist/pages/good.js").exists());
        assert!(root.join("dist/pages/good.wxml").exists());
        assert!(!root.join("dist/pages/bad.js").exists());
    }

    #[tokio::test]
    async fn sub_components_ride_using_components() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        scaffold_project(root, &["pages/index"]);
        write(
            root,
            "source/pages/index.js",
            r#"
import React from "@react";
import Row from "../components/Row/index";

class Index extends React.Component {
    render() {
        return <div><Row /></div>;
    }
}
export default Index;
"#,
        );
        write(
            root,
            "source/components/Row/index.js",
            r#"
import React from "@react";

class Row extends React.Component {
    render() {
        return <div className="row">{this.props.value}</div>;
    }
}
export default Row;
"#,
        );

        let mut builder = Builder::new(BuildOptions::new(root, Platform::Wx));
        let report = builder.build().await.unwrap();
        assert!(report.ok(), "unexpected failures: {}", report.render());

        // The component compiles into its own parallel artifacts.
        assert!(root.join("dist/components/Row/index.js").exists());
        assert!(root.join("dist/components/Row/index.wxml").exists());

        let row_config: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(root.join("dist/components/Row/index.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(row_config["component"], true);

        // The page references it through config, not through an import.
        let page_config: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(root.join("dist/pages/index.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(
            page_config["usingComponents"]["Row"],
            "../components/Row/index"
        );
        let page_script = std::fs::read_to_string(root.join("dist/pages/index.js")).unwrap();
        assert!(!page_script.contains("components/Row"));

        let page_template =
            std::fs::read_to_string(root.join("dist/pages/index.wxml")).unwrap();
        assert!(page_template.contains("is=\"Row\""));
    }

    #[tokio::test]
    async fn platform_selection_changes_extensions_and_directives() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        scaffold_project(root, &["pages/index"]);
        write(root, "source/pages/index.js", INDEX_PAGE);
        write(root, "source/pages/index.scss", ".page {}\n");

        let mut builder = Builder::new(BuildOptions::new(root, Platform::Ali));
        let report = builder.build().await.unwrap();
        assert!(report.ok(), "unexpected failures: {}", report.render());

        let template = std::fs::read_to_string(root.join("dist/pages/index.axml")).unwrap();
        assert!(template.contains("a:for=\"{{state.list}}\""));
        assert!(template.contains("onTap=\"dispatchEvent\""));
        assert!(root.join("dist/pages/index.acss").exists());
        assert!(root.join("dist/ReactAli.js").exists());
    }

    struct RecordingHook(Arc<AtomicBool>);

    impl ExitHook for RecordingHook {
        fn exit(&self, _code: i32) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn missing_entry_is_fatal_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let called = Arc::new(AtomicBool::new(false));
        let mut builder = Builder::new(BuildOptions::new(dir.path(), Platform::Wx))
            .with_exit_hook(Box::new(RecordingHook(called.clone())));

        let err = builder.build().await.unwrap_err();
        assert!(matches!(err, CompileError::MissingEntry(_)));
        assert!(called.load(Ordering::SeqCst));
        assert!(!dir.path().join("dist").exists());
    }

    #[tokio::test]
    async fn unknown_platform_fails_the_selector() {
        assert!(matches!(
            "swan".parse::<Platform>(),
            Err(CompileError::UnknownPlatform(_))
        ));
    }

    #[tokio::test]
    async fn cached_builds_replay_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        scaffold_project(root, &["pages/index"]);
        write(root, "source/pages/index.js", INDEX_PAGE);
        write(root, "source/pages/index.scss", ".page { color: red; }\n");

        let mut options = BuildOptions::new(root, Platform::Wx);
        options.cache = true;

        let mut first = Builder::new(options.clone());
        let report = first.build().await.unwrap();
        assert!(report.ok());

        // A fresh builder with a clean destination reuses the cached
        // artifacts and still rebuilds the full graph.
        std::fs::remove_dir_all(root.join("dist")).unwrap();
        let mut second = Builder::new(options);
        let report = second.build().await.unwrap();
        assert!(report.ok(), "unexpected failures: {}", report.render());
        for artifact in [
            "dist/pages/index.js",
            "dist/pages/index.wxml",
            "dist/pages/index.json",
            "dist/pages/index.wxss",
            "dist/app.json",
        ] {
            assert!(root.join(artifact).exists(), "missing {}", artifact);
        }
    }
}
