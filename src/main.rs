use clap::{Args, Parser, Subcommand};
use product_images::config::{self, ImagesConfig};
use product_images::imaging::{RustBackend, UploadFile};
use product_images::output;
use product_images::registry::Registry;
use product_images::storage::{
    BackendSelector, LocalBackend, MemoryBackend, RemoteBackend, StorageBackend,
};
use product_images::types::{DraftId, ImageId, PersistedId, ProductId};
use product_images::upload::{UploadCoordinator, UploadOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let hash = env!("GIT_HASH");
    if hash.is_empty() {
        env!("CARGO_PKG_VERSION")
    } else {
        // Leaked once at startup
        Box::leak(format!("{}@{hash}", env!("CARGO_PKG_VERSION")).into_boxed_str())
    }
}

#[derive(Parser)]
#[command(name = "product-images")]
#[command(about = "Compress, store and organize product images")]
#[command(long_about = "\
Compress, store and organize product images

Images for a committed product go to the remote object store and are listed
in its index. Images for a draft product stay on local disk until the draft
is either persisted (moved to the remote store) or discarded.

Accepted inputs are JPEG, PNG, WebP, GIF and TIFF. AVIF is an output format
only.

  product-images upload --product P-1042 front.jpg back.jpg
  product-images upload --draft --persist-as P-1042 front.jpg
  product-images list --product P-1042
  product-images set-primary --product P-1042 <image-id>
  product-images remove --product P-1042 <image-id>

Run 'product-images gen-config' to generate a documented product-images.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file (missing file means stock defaults)
    #[arg(long, default_value = config::DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

/// Which product an upload targets.
#[derive(Args, Clone)]
#[group(required = true, multiple = false)]
struct Target {
    /// Upload into a fresh draft product
    #[arg(long)]
    draft: bool,

    /// Committed product id
    #[arg(long)]
    product: Option<String>,
}

#[derive(Args, Clone)]
struct UploadArgs {
    #[command(flatten)]
    target: Target,

    /// With --draft: move the uploaded images onto this committed product
    #[arg(long, requires = "draft")]
    persist_as: Option<String>,

    /// With --draft and no --persist-as: keep the draft blobs on disk
    #[arg(long, requires = "draft", conflicts_with = "persist_as")]
    keep_local: bool,

    /// Image files to upload, in order
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Compress and store images for a product
    Upload(UploadArgs),
    /// List a product's images, primary first
    List {
        #[arg(long)]
        product: String,
    },
    /// Make an image the product's primary image
    SetPrimary {
        #[arg(long)]
        product: String,
        image: ImageId,
    },
    /// Delete an image and its thumbnail
    Remove {
        #[arg(long)]
        product: String,
        image: ImageId,
    },
    /// Print a stock product-images.toml with all options documented
    GenConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("product_images=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let images_config = config::load_config(&cli.config)?;

    match cli.command {
        Command::Upload(args) => upload(&images_config, args).await?,
        Command::List { product } => {
            let product = ProductId::persisted(product)?;
            let registry = open_registry(&images_config, true).await?;
            let images = registry.load(&product).await?;
            output::print_image_list(&product, &images);
        }
        Command::SetPrimary { product, image } => {
            let product = ProductId::persisted(product)?;
            let registry = open_registry(&images_config, true).await?;
            registry.load(&product).await?;
            registry.set_primary(&product, image).await?;
            output::print_image_list(&product, &registry.list_images(&product).await?);
        }
        Command::Remove { product, image } => {
            let product = ProductId::persisted(product)?;
            let registry = open_registry(&images_config, true).await?;
            registry.load(&product).await?;
            let removal = registry.remove_image(image).await?;
            info!(%product, image = %image, ?removal, "remove finished");
            output::print_image_list(&product, &registry.list_images(&product).await?);
        }
        Command::GenConfig => {}
    }

    Ok(())
}

async fn upload(
    images_config: &ImagesConfig,
    args: UploadArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let persist_as = args.persist_as.map(PersistedId::new).transpose()?;
    let (product, draft) = match args.target.product {
        Some(id) => (ProductId::persisted(id)?, None),
        None => {
            let draft = DraftId::generate();
            (ProductId::draft(draft), Some(draft))
        }
    };
    let needs_remote = !product.is_draft() || persist_as.is_some();

    let registry = Arc::new(open_registry(images_config, needs_remote).await?);
    if !product.is_draft() {
        registry.load(&product).await?;
    }
    let coordinator = UploadCoordinator::new(Arc::new(RustBackend::new()), registry.clone());
    let options = UploadOptions::from_config(images_config);

    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        files.push(read_upload(path).await?);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing the current file");
            on_interrupt.cancel();
        }
    });

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            output::print_upload_event(&event);
        }
    });
    let result = coordinator
        .upload_batch(files, &product, &options, Some(&tx), &cancel)
        .await;
    drop(tx);
    printer.await?;
    let result = result?;

    if let Some(draft) = draft {
        match persist_as {
            Some(target) => {
                let report = registry.rekey(&draft, &target).await?;
                output::print_rekey_report(&ProductId::Persisted(target), &report);
            }
            None if args.keep_local => {
                info!(%product, count = result.succeeded.len(), "draft kept on local disk");
            }
            None => {
                registry.discard_draft(&draft).await?;
            }
        }
    }
    Ok(())
}

/// Wire the local and remote backends into a registry.
///
/// Draft-only runs never route to the remote store, so an unconfigured
/// endpoint is only an error when `needs_remote` is set.
async fn open_registry(
    images_config: &ImagesConfig,
    needs_remote: bool,
) -> Result<Registry, Box<dyn std::error::Error>> {
    let local = LocalBackend::open(&images_config.local.root, images_config.local.quota_bytes).await?;
    debug!(
        root = %local.root().display(),
        quota_bytes = local.quota_bytes(),
        used_bytes = local.used_bytes(),
        "local draft store opened"
    );
    let remote: Arc<dyn StorageBackend> = if images_config.remote.is_configured() {
        Arc::new(RemoteBackend::new(images_config.remote.settings())?)
    } else if needs_remote {
        return Err("remote.endpoint is not configured".into());
    } else {
        Arc::new(MemoryBackend::new())
    };
    Ok(Registry::new(BackendSelector::new(Arc::new(local), remote)))
}

async fn read_upload(path: &Path) -> Result<UploadFile, Box<dyn std::error::Error>> {
    let bytes = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(UploadFile::new(file_name, mime_for_path(path), bytes))
}

/// Declared media type for a file, from its extension.
fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_follows_decodable_extensions() {
        assert_eq!(mime_for_path(Path::new("front.JPG")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("scan.tif")), "image/tiff");
        assert_eq!(mime_for_path(Path::new("shelf.webp")), "image/webp");
        // Only encoded, never decoded, so it must not pass the image check.
        assert_eq!(
            mime_for_path(Path::new("hero.avif")),
            "application/octet-stream"
        );
        assert_eq!(mime_for_path(Path::new("README")), "application/octet-stream");
    }
}
