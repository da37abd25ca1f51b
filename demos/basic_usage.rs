//! 基础用法演示
//!
//! 演示组件运行时的完整流程：
//! 注册模块 -> 启动容器 -> 安装/启用 -> 事件订阅 -> 解析单元

use std::sync::Arc;

use mosaic_core::module::descriptor::{
    DependencyDescriptor, FeatureDescriptor, ModuleDescriptor,
};
use mosaic_core::module::loader::{CodebaseSpec, IdentitySpec, LoaderSpec};
use mosaic_core::module::version::ComponentVersion;
use mosaic_core::{
    ComponentIdentity, Container, CoreConfig, HostEnvironment, Logger, LoggerConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    let _guard = Logger::try_init(LoggerConfig::builder().level("info").build());

    // 创建容器
    let config = CoreConfig::builder().host_version("1.0").build()?;
    let container = Container::new(config);

    // 注册模块（实际场景中由外部清单源构造描述符）
    container
        .add_module(
            ModuleDescriptor::new("storage", "存储", ComponentVersion::parse("1.0")?)
                .with_feature(FeatureDescriptor::new("storage.kv", "KV 存储")),
        )
        .await?;
    container
        .add_module(
            ModuleDescriptor::new("blog", "博客", ComponentVersion::parse("1.2")?)
                .with_feature(
                    FeatureDescriptor::new("blog.post", "文章")
                        .with_dependency(DependencyDescriptor::new("storage.kv")),
                )
                .with_loader(LoaderSpec {
                    identity: IdentitySpec {
                        name: "blog".to_string(),
                        culture: None,
                        token: None,
                        architecture: None,
                    },
                    redirect: None,
                    codebase: Some(CodebaseSpec {
                        version: "1.2".to_string(),
                        location: "/opt/mosaic/units/blog-1.2.unit".to_string(),
                    }),
                }),
        )
        .await?;

    // 订阅事件
    container
        .subscribe(
            None,
            Arc::new(|event| {
                println!("事件: {} -> {}", event.kind, event.subject);
            }),
        )
        .await;

    // 启动：无钩子的组件自动落位
    container
        .start(HostEnvironment::new(ComponentVersion::parse("1.0")?))
        .await?;

    for feature in container.get_features().await {
        println!(
            "特性 {}: enabled={} errors={:?}",
            feature.id,
            feature.is_enabled(),
            feature.errors
        );
    }

    // 解析可装载单元
    let unit = container
        .resolve_unit(&ComponentIdentity::new("blog").with_version(ComponentVersion::parse("1.2")?))
        .await?;
    println!("单元已解析: {} @ {}", unit.identity, unit.location);

    // 停用 storage.kv 会级联停用 blog.post
    container.disable_features(&["storage.kv"]).await?;
    println!(
        "blog.post enabled = {}",
        container.get_feature("blog.post").await.unwrap().is_enabled()
    );

    println!("指标: {}", serde_json::to_string_pretty(&container.stats())?);
    Ok(())
}
