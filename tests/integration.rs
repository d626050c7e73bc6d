#[cfg(test)]
#[allow(clippy::expect_used)] // Tests panic on failure by design.
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use axum_dispatch::{
        App, AppBuilder, AppConfig, Base, Bind, Controller, Gate, HttpRequest, HttpResponse,
        InjectError, InlineTemplate, Interceptor, RegistrationError, RegistrationErrorKind, Reply,
        RouteInfo, Service, TemplateEngine, TemplateError, Verb,
    };
    use bytes::Bytes;
    use http::{Extensions, StatusCode, header};
    use serde::{Deserialize, Serialize};
    use serde_json::{Map, Value, json};
    use tower::ServiceExt;

    // ==============================================================================
    // Test Helpers
    // ==============================================================================

    const HOST: &str = "www.example.com";

    /// Send a request to the app and return the response.
    async fn send_request(
        app: App,
        method: &str,
        host: &str,
        uri: &str,
        body: Option<(&str, &str)>,
    ) -> axum::response::Response {
        let builder = http::Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, host);
        let req = if let Some((content_type, body)) = body {
            builder
                .header(header::CONTENT_TYPE, content_type)
                .body(axum::body::Body::from(body.to_owned()))
                .expect("valid request")
        } else {
            builder
                .body(axum::body::Body::empty())
                .expect("valid request")
        };
        app.oneshot(req).await.expect("infallible")
    }

    async fn get(app: &App, uri: &str) -> axum::response::Response {
        send_request(app.clone(), "GET", HOST, uri, None).await
    }

    async fn get_body(resp: axum::response::Response) -> String {
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("read body");
        String::from_utf8(body.to_vec()).expect("utf8")
    }

    async fn get_json(resp: axum::response::Response) -> Value {
        serde_json::from_str(&get_body(resp).await).expect("json body")
    }

    fn content_type(resp: &axum::response::Response) -> Option<&str> {
        resp.headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    // ==============================================================================
    // Controllers
    // ==============================================================================

    #[derive(Default)]
    struct Users {
        base: Base,
    }

    impl Controller for Users {
        fn base(&mut self) -> &mut Base {
            &mut self.base
        }
    }

    #[derive(Debug, Default, Deserialize, Serialize)]
    #[serde(default)]
    struct UserForm {
        name: String,
        age: i64,
    }

    #[allow(clippy::unused_self, clippy::needless_pass_by_value)]
    impl Users {
        fn show(&mut self, id: i32) -> String {
            format!("user:{id}")
        }

        fn search(&mut self, page: i32, name: String) -> String {
            format!("page={page} name={name}")
        }

        fn create(&mut self, Bind(form): Bind<UserForm>) -> Bytes {
            self.base.success(form)
        }

        fn link(&mut self) -> String {
            self.base
                .url_for(Verb::Get, "Users", "Show")
                .unwrap_or("none")
                .to_owned()
        }

        fn login(&mut self) -> Bytes {
            self.base.redirect("/login", 302)
        }

        fn missing(&mut self) -> Option<String> {
            None
        }

        #[allow(clippy::panic)] // the panic is what is under test
        fn crash(&mut self) -> &'static str {
            panic!("boom")
        }

        #[allow(clippy::panic)] // the panic is what is under test
        fn forbidden(&mut self) -> &'static str {
            self.base.response().write_header(StatusCode::FORBIDDEN);
            panic!("no access")
        }

        fn page(&mut self) -> Option<Reply> {
            let mut share = Map::new();
            share.insert("site".to_owned(), json!("Example"));
            self.base.add_share(share);
            self.base.render_html("page", json!({"title": "Home"})).ok()
        }

        fn inline(&mut self) -> Option<Reply> {
            self.base
                .render_html_str("<b>{{name}}</b>", json!({"name": "ann"}))
                .ok()
        }
    }

    fn users_app(builder: AppBuilder) -> App {
        builder
            .register("*", "", None, |r| {
                r.get("/user/:id:int:1:9999", Users::default, "Show(id int)", Users::show)
                    .get("/search", Users::default, "Search(page int, name string)", Users::search)
                    .post("/users", Users::default, "Create(form UserForm)", Users::create)
                    .get("/link", Users::default, "Link()", Users::link)
                    .get("/login", Users::default, "Login()", Users::login)
                    .get("/missing", Users::default, "Missing()", Users::missing)
                    .get("/crash", Users::default, "Crash()", Users::crash)
                    .get("/forbidden", Users::default, "Forbidden()", Users::forbidden)
                    .get("/page", Users::default, "Page()", Users::page)
                    .get("/inline", Users::default, "Inline()", Users::inline);
            })
            .build()
            .expect("routes register")
    }

    // ==============================================================================
    // Matching
    // ==============================================================================

    #[tokio::test]
    async fn typed_path_parameter() {
        let app = users_app(AppBuilder::new());

        let resp = get(&app, "/user/42").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(get_body(resp).await, "user:42");

        let resp = get(&app, "/user/0").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            get_body(resp).await,
            "not found route of path 'www.example.com/user/0'"
        );

        let resp = get(&app, "/user/abc").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn exact_match_then_longest_prefix() {
        let app = AppBuilder::new()
            .register("*", "", None, |r| {
                r.get("/a", Users::default, "A()", |_: &mut Users| "a")
                    .get("/a/b", Users::default, "Ab()", |_: &mut Users| "ab")
                    .get("/*", Users::default, "All()", |_: &mut Users| "all");
            })
            .build()
            .expect("routes register");

        assert_eq!(get_body(get(&app, "/a").await).await, "a");
        assert_eq!(get_body(get(&app, "/a/b/c").await).await, "ab");
        assert_eq!(get_body(get(&app, "/a/x").await).await, "a");
        assert_eq!(get_body(get(&app, "/zzz").await).await, "all");
    }

    #[tokio::test]
    async fn root_route_leaves_other_paths_to_the_wildcard() {
        let app = AppBuilder::new()
            .register("*", "", None, |r| {
                r.get("/", Users::default, "Home()", |_: &mut Users| "home")
                    .get("/*", Users::default, "All()", |_: &mut Users| "all")
                    .get("/user/:id:int:1:9999", Users::default, "Show(id int)", Users::show);
            })
            .build()
            .expect("routes register");

        assert_eq!(get_body(get(&app, "/").await).await, "home");
        assert_eq!(get_body(get(&app, "/elsewhere").await).await, "all");
        assert_eq!(get_body(get(&app, "/user/0").await).await, "all");
        assert_eq!(get_body(get(&app, "/user/5").await).await, "user:5");
    }

    #[tokio::test]
    async fn root_route_does_not_shadow_misses() {
        let app = AppBuilder::new()
            .register("*", "", None, |r| {
                r.get("/", Users::default, "Home()", |_: &mut Users| "home")
                    .get("/user/:id:int:1:9999", Users::default, "Show(id int)", Users::show);
            })
            .build()
            .expect("routes register");

        assert_eq!(get_body(get(&app, "/").await).await, "home");
        assert_eq!(get(&app, "/user/0").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(get(&app, "/missing").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn namespace_root_serves_its_subtree() {
        let app = AppBuilder::new()
            .register("*", "", None, |r| {
                r.get("/admin/", Users::default, "Admin()", |_: &mut Users| "admin");
            })
            .build()
            .expect("routes register");

        assert_eq!(get_body(get(&app, "/admin/users").await).await, "admin");
        assert_eq!(get(&app, "/administrator").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn subdomain_namespaces() {
        let app = AppBuilder::new()
            .register("*", "", None, |r| {
                r.get("/home", Users::default, "Home()", |_: &mut Users| "any");
            })
            .register("blog", "/posts/", None, |r| {
                r.get("/:id:int", Users::default, "Post(id int)", |_: &mut Users, id: i32| {
                    format!("post:{id}")
                });
            })
            .build()
            .expect("routes register");

        let resp = send_request(app.clone(), "GET", "blog.example.com", "/posts/7", None).await;
        assert_eq!(get_body(resp).await, "post:7");

        let resp = send_request(app.clone(), "GET", "api.example.com", "/home", None).await;
        assert_eq!(get_body(resp).await, "any");

        let resp = send_request(app, "GET", "api.example.com", "/posts/7", None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unsupported_method_without_any_route() {
        let app = users_app(AppBuilder::new());
        let resp = send_request(app, "PATCH", HOST, "/user/42", None).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn any_routes_serve_other_methods() {
        let app = AppBuilder::new()
            .register("*", "", None, |r| {
                r.any("/hook", Users::default, "Hook()", |u: &mut Users| {
                    u.base().request().method().to_string()
                });
            })
            .build()
            .expect("routes register");

        let resp = send_request(app.clone(), "PATCH", HOST, "/hook", None).await;
        assert_eq!(get_body(resp).await, "PATCH");
        let resp = send_request(app.clone(), "POST", HOST, "/hook", None).await;
        assert_eq!(get_body(resp).await, "POST");
        let resp = send_request(app, "PUT", HOST, "/hook", None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    // ==============================================================================
    // Binding
    // ==============================================================================

    #[tokio::test]
    async fn query_scalars_degrade_to_zero() {
        let app = users_app(AppBuilder::new());

        let resp = get(&app, "/search?page=3&name=ann").await;
        assert_eq!(get_body(resp).await, "page=3 name=ann");

        let resp = get(&app, "/search?page=abc").await;
        assert_eq!(get_body(resp).await, "page=0 name=");
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct Counters {
        n: i32,
        small: u8,
    }

    #[tokio::test]
    async fn narrow_struct_fields_degrade_to_zero() {
        let app = AppBuilder::new()
            .register("*", "", None, |r| {
                r.get(
                    "/counters",
                    Users::default,
                    "Counters(c Counters)",
                    |_: &mut Users, Bind(c): Bind<Counters>| format!("n={} small={}", c.n, c.small),
                );
            })
            .build()
            .expect("routes register");

        let resp = get(&app, "/counters?n=99999999999").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(get_body(resp).await, "n=0 small=0");

        let resp = get(&app, "/counters?n=12&small=300").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(get_body(resp).await, "n=12 small=0");

        let resp = get(&app, "/counters?n=-3&small=255").await;
        assert_eq!(get_body(resp).await, "n=-3 small=255");
    }

    #[tokio::test]
    async fn struct_from_json_body() {
        let app = users_app(AppBuilder::new());
        let resp = send_request(
            app,
            "POST",
            HOST,
            "/users",
            Some(("application/json", r#"{"name": "ann", "age": "31"}"#)),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(content_type(&resp), Some("application/json"));
        assert_eq!(
            get_json(resp).await,
            json!({"code": 0, "data": {"name": "ann", "age": 31}})
        );
    }

    #[tokio::test]
    async fn struct_from_form_over_query() {
        let app = users_app(AppBuilder::new());
        let resp = send_request(
            app,
            "POST",
            HOST,
            "/users?age=7&name=query",
            Some(("application/x-www-form-urlencoded", "name=bob")),
        )
        .await;

        assert_eq!(
            get_json(resp).await,
            json!({"code": 0, "data": {"name": "bob", "age": 7}})
        );
    }

    // ==============================================================================
    // Interceptors, injectors, init
    // ==============================================================================

    struct Vault {
        base: Base,
        hits: Arc<AtomicUsize>,
    }

    impl Controller for Vault {
        fn base(&mut self) -> &mut Base {
            &mut self.base
        }
    }

    #[tokio::test]
    async fn interceptor_veto_skips_action() {
        let hits = Arc::new(AtomicUsize::new(0));
        let gate: Arc<dyn Interceptor> = Arc::new(
            |_: &RouteInfo, _: &mut Service, req: &HttpRequest, _: &mut HttpResponse| {
                if req.header("x-token") == Some("letmein") {
                    Gate::Pass
                } else {
                    Gate::Reject(Bytes::from_static(b"denied"))
                }
            },
        );
        let counter = Arc::clone(&hits);
        let app = AppBuilder::new()
            .register("*", "/vault", Some(gate), move |r| {
                r.get(
                    "/",
                    move || Vault {
                        base: Base::default(),
                        hits: Arc::clone(&counter),
                    },
                    "Open()",
                    |v: &mut Vault| {
                        v.hits.fetch_add(1, Ordering::SeqCst);
                        "secret"
                    },
                );
            })
            .build()
            .expect("routes register");

        let resp = get(&app, "/vault/").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(get_body(resp).await, "denied");
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let req = http::Request::builder()
            .uri("/vault/")
            .header(header::HOST, HOST)
            .header("x-token", "letmein")
            .body(axum::body::Body::empty())
            .expect("valid request");
        let resp = app.oneshot(req).await.expect("infallible");
        assert_eq!(get_body(resp).await, "secret");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[derive(Clone)]
    struct Tenant(&'static str);

    #[derive(Default)]
    struct Greeter {
        base: Base,
        greeting: String,
    }

    impl Controller for Greeter {
        const HAS_INIT: bool = true;

        fn base(&mut self) -> &mut Base {
            &mut self.base
        }

        fn init(&mut self) {
            let tenant = self.base.extensions().get::<Tenant>().map_or("nobody", |t| t.0);
            self.greeting = format!("hello {tenant}");
        }
    }

    fn greeter_app(builder: AppBuilder) -> App {
        builder
            .register("*", "", None, |r| {
                r.get("/hello", Greeter::default, "Hello()", |g: &mut Greeter| g.greeting.clone());
            })
            .build()
            .expect("routes register")
    }

    #[tokio::test]
    async fn injector_feeds_init() {
        let app = greeter_app(AppBuilder::new().injector(
            |_: &RouteInfo, ext: &mut Extensions, _: &mut Service| -> Result<(), InjectError> {
                ext.insert(Tenant("acme"));
                Ok(())
            },
        ));
        assert_eq!(get_body(get(&app, "/hello").await).await, "hello acme");

        let app = greeter_app(AppBuilder::new());
        assert_eq!(get_body(get(&app, "/hello").await).await, "hello nobody");
    }

    #[tokio::test]
    async fn injector_failure_is_rendered() {
        let app = greeter_app(AppBuilder::new().injector(
            |_: &RouteInfo, _: &mut Extensions, _: &mut Service| -> Result<(), InjectError> {
                Err(InjectError::new("tenant missing"))
            },
        ));
        let resp = get(&app, "/hello").await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            get_json(resp).await,
            json!({"code": -1, "message": "injector failed: tenant missing"})
        );
    }

    // ==============================================================================
    // Recovery
    // ==============================================================================

    #[tokio::test]
    async fn panic_becomes_json_failure() {
        let app = users_app(AppBuilder::new());
        let resp = get(&app, "/crash").await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(content_type(&resp), Some("application/json"));
        assert_eq!(get_json(resp).await, json!({"code": -1, "message": "boom"}));

        // The app keeps serving.
        assert_eq!(get_body(get(&app, "/user/1").await).await, "user:1");
    }

    #[tokio::test]
    async fn explicit_status_survives_panic() {
        let app = users_app(AppBuilder::new());
        let resp = get(&app, "/forbidden").await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            get_json(resp).await,
            json!({"code": 403, "message": "no access"})
        );
    }

    #[tokio::test]
    async fn verbose_panic_report() {
        let app = users_app(AppBuilder::new().config(AppConfig {
            verbose: true,
            ..AppConfig::default()
        }));
        let resp = get(&app, "/crash").await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(content_type(&resp).is_some_and(|ct| ct.starts_with("text/plain")));
        let body = get_body(resp).await;
        assert!(body.starts_with("panic: boom ["), "{body}");
        assert!(body.contains("integration.rs"), "{body}");
    }

    #[tokio::test]
    async fn missing_body_is_a_failure() {
        let app = users_app(AppBuilder::new());
        let resp = get(&app, "/missing").await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            get_json(resp).await,
            json!({"code": -1, "message": "action returned no body"})
        );
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let app = users_app(AppBuilder::new().config(AppConfig {
            max_body_bytes: 4,
            ..AppConfig::default()
        }));
        let resp = send_request(
            app,
            "POST",
            HOST,
            "/users",
            Some(("application/json", r#"{"name": "a long name"}"#)),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(get_json(resp).await["code"], json!(413));
    }

    // ==============================================================================
    // Rendering
    // ==============================================================================

    struct Pages;

    impl TemplateEngine for Pages {
        fn execute_by_name(&self, name: &str, data: &Value) -> Result<Vec<u8>, TemplateError> {
            if name != "page" {
                return Err(TemplateError::NotFound(name.to_owned()));
            }
            let title = data["title"].as_str().unwrap_or("");
            let site = data["site"].as_str().unwrap_or("");
            Ok(format!("<h1>{title}</h1><p>{site}</p>").into_bytes())
        }

        fn execute(
            &self,
            template: &InlineTemplate,
            data: &Value,
        ) -> Result<Vec<u8>, TemplateError> {
            let name = data["name"].as_str().unwrap_or("");
            Ok(template.source().replace("{{name}}", name).into_bytes())
        }
    }

    #[tokio::test]
    async fn templates_render_with_share_data() {
        let app = users_app(AppBuilder::new().templates(Pages));

        let resp = get(&app, "/page").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(content_type(&resp), Some("text/html; charset=utf-8"));
        assert_eq!(get_body(resp).await, "<h1>Home</h1><p>Example</p>");

        let resp = get(&app, "/inline").await;
        assert_eq!(get_body(resp).await, "<b>ann</b>");
    }

    #[tokio::test]
    async fn templates_without_engine_fail() {
        let app = users_app(AppBuilder::new());
        let resp = get(&app, "/page").await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn redirect_sets_location() {
        let app = users_app(AppBuilder::new());
        let resp = get(&app, "/login").await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers().get(header::LOCATION).and_then(|v| v.to_str().ok()),
            Some("/login")
        );
    }

    // ==============================================================================
    // Reverse lookup and registration
    // ==============================================================================

    #[tokio::test]
    async fn url_for_returns_templates() {
        let app = users_app(AppBuilder::new());
        assert_eq!(app.url_for("GET", "Users", "Show"), Some("/user/:id"));
        assert_eq!(app.url_for("post", "Users", "Create"), Some("/users"));
        assert_eq!(app.url_for("GET", "Users", "Create"), None);
        assert_eq!(app.url_for("PATCH", "Users", "Show"), None);

        assert_eq!(get_body(get(&app, "/link").await).await, "/user/:id");
    }

    #[test]
    fn signature_mismatch_fails_build() {
        let err = AppBuilder::new()
            .register("*", "", None, |r| {
                r.get("/user/:id:int", Users::default, "Show(id int64)", Users::show);
            })
            .build()
            .err();
        assert!(matches!(
            err,
            Some(RegistrationError {
                kind: RegistrationErrorKind::Signature(_),
                ..
            })
        ));
    }

    #[test]
    fn hooks_see_every_route() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let app = users_app(AppBuilder::new().hook(move |_: &RouteInfo| -> Result<(), InjectError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        assert_eq!(seen.load(Ordering::SeqCst), 10);
        assert_eq!(app.routes().len(), 10);
    }
}
