use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use burn_dataset::network::downloader::download_file_as_bytes;
use burn_dataset::{
    Dataset, InMemDataset,
    transform::{Mapper, MapperDataset},
};
use flate2::read::GzDecoder;
use num_traits::AsPrimitive;
use serde::{Deserialize, Serialize};
use std::fs::{File, create_dir_all};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

// adapted from burn-dataset's vision module, which is not enabled here
// https://github.com/tracel-ai/burn/blob/fa4f9845a6b2279cd8de68bf7ca5a7eb76dec96d/crates/burn-dataset/src/vision/mnist.rs

// CVDF mirror of http://yann.lecun.com/exdb/mnist/
const URL: &str = "https://storage.googleapis.com/cvdf-datasets/mnist/";
const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

pub const WIDTH: usize = 28;
pub const HEIGHT: usize = 28;

/// MNIST item.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MnistItem {
    /// Row-major image, each value a brightness in between 0.0 and 255.0.
    ///
    /// # Shape
    /// [HEIGHT * WIDTH]
    pub image: Vec<f32>,

    /// Label of the image.
    /// Each value is in between 0 and 9.
    pub label: u8,
}

impl MnistItem {
    /// The digit as a gray RGB picture, for overlays.
    pub fn to_rgb(&self) -> image::RgbImage {
        image::RgbImage::from_fn(WIDTH as u32, HEIGHT as u32, |x, y| {
            let brightness = self.image[y as usize * WIDTH + x as usize] as u8;
            image::Rgb([brightness; 3])
        })
    }
}

#[derive(Deserialize, Debug, Clone)]
struct MnistItemRaw {
    pub image_bytes: Vec<u8>,
    pub label: u8,
}

struct BytesToImage;

impl Mapper<MnistItemRaw, MnistItem> for BytesToImage {
    fn map(&self, item: &MnistItemRaw) -> MnistItem {
        debug_assert_eq!(item.image_bytes.len(), WIDTH * HEIGHT);
        MnistItem {
            image: item.image_bytes.iter().map(|b| (*b).as_()).collect(),
            label: item.label,
        }
    }
}

type MappedDataset = MapperDataset<InMemDataset<MnistItemRaw>, BytesToImage, MnistItemRaw>;

/// 60,000 training and 10,000 test digits, 28×28 grayscale, labels 0 to 9.
///
/// Files are fetched once from the [CVDF mirror](https://github.com/cvdfoundation/mnist)
/// into `~/.cache/burn-dataset/mnist` and kept in memory.
pub struct MnistDataset {
    dataset: MappedDataset,
}

impl Dataset<MnistItem> for MnistDataset {
    fn get(&self, index: usize) -> Option<MnistItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

#[derive(Debug, Clone, Copy)]
enum Split {
    Train,
    Test,
}

impl Split {
    fn name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }

    /// (images, labels) file names.
    fn files(&self) -> (&'static str, &'static str) {
        match self {
            Split::Train => (TRAIN_IMAGES, TRAIN_LABELS),
            Split::Test => (TEST_IMAGES, TEST_LABELS),
        }
    }
}

impl MnistDataset {
    pub fn train() -> Self {
        Self::new(Split::Train)
    }

    pub fn test() -> Self {
        Self::new(Split::Test)
    }

    fn new(split: Split) -> Self {
        let _span = tracing::info_span!("mnist", split = split.name()).entered();
        let split_dir = dirs::home_dir()
            .expect("Could not get home directory")
            .join(".cache")
            .join("burn-dataset")
            .join("mnist")
            .join(split.name());
        create_dir_all(&split_dir).expect("Failed to create the dataset directory");

        let (images_name, labels_name) = split.files();
        let images = download_file(images_name, &split_dir);
        let labels = download_file(labels_name, &split_dir);

        // idx headers: magic + count for labels, magic + count + rows + cols for images
        let images = read_idx(&images, 16, WIDTH * HEIGHT);
        let labels = read_idx(&labels, 8, 1);
        debug_assert_eq!(images.len(), labels.len());
        tracing::info!(len = images.len(), "loaded");

        let items: Vec<_> = images
            .into_iter()
            .zip(labels)
            .map(|(image_bytes, label)| MnistItemRaw {
                image_bytes,
                label: label[0],
            })
            .collect();
        let dataset = MapperDataset::new(InMemDataset::new(items), BytesToImage);
        Self { dataset }
    }
}

/// Downloads and decompresses `name` into `dest_dir`, unless already cached.
fn download_file(name: &str, dest_dir: &Path) -> PathBuf {
    let file_name = dest_dir.join(name);
    if !file_name.exists() {
        let bytes = download_file_as_bytes(&format!("{URL}{name}.gz"), name);
        tracing::info!(?file_name, "decompressing");
        let mut output_file =
            File::create(&file_name).expect("Failed to create the dataset file");
        let mut gz_buffer = GzDecoder::new(&bytes[..]);
        std::io::copy(&mut gz_buffer, &mut output_file)
            .expect("Failed to decompress the dataset file");
    }
    file_name
}

/// Reads the items of an idx file, each `item_len` bytes long.
fn read_idx(path: &Path, header_len: u64, item_len: usize) -> Vec<Vec<u8>> {
    let mut f = File::open(path).expect("Failed to open the dataset file");
    let mut count = [0u8; 4];
    f.seek(SeekFrom::Start(4)).expect("Failed to seek the header");
    f.read_exact(&mut count)
        .expect("Should be able to read the item count");
    let count = u32::from_be_bytes(count) as usize;

    let mut buf = vec![0u8; item_len * count];
    f.seek(SeekFrom::Start(header_len))
        .expect("Failed to seek the items");
    f.read_exact(&mut buf)
        .expect("Should be able to read the items");
    buf.chunks(item_len).map(|chunk| chunk.to_vec()).collect()
}

/// Batches single-channel digits, scaled to [0, 1].
#[derive(Clone, Default)]
pub struct MnistBatcher {}

#[derive(Clone, Debug)]
pub struct MnistBatch<B: Backend> {
    /// Brightness divided by 255.
    ///
    /// # Shape
    /// [batch_size, 1, HEIGHT, WIDTH]
    pub images: Tensor<B, 4>,
    /// # Shape
    /// [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, MnistItem, MnistBatch<B>> for MnistBatcher {
    fn batch(&self, items: Vec<MnistItem>, device: &B::Device) -> MnistBatch<B> {
        let batch_size = items.len();
        let (images, labels): (Vec<_>, Vec<_>) = items
            .into_iter()
            .map(|item| (item.image, item.label as i64))
            .unzip();

        let images = TensorData::new(images.concat(), [batch_size, 1, HEIGHT, WIDTH])
            .convert::<B::FloatElem>();
        let images = Tensor::<B, 4>::from_data(images, device) / 255;

        let targets = TensorData::new(labels, [batch_size]).convert::<B::IntElem>();
        let targets = Tensor::<B, 1, Int>::from_data(targets, device);

        MnistBatch { images, targets }
    }
}
