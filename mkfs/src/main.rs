//! Builds an rvos file system image.
//!
//! ```text
//! mkfs fs.img [files...]
//! ```
//!
//! Lays out the image per the superblock geometry (boot block,
//! superblock, log, inode region, bitmap, data), creates the root
//! directory, and adds each named file as a regular file in the root.

use std::{
    env,
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write as _},
    path::Path,
    process,
};

use dataview::PodMethods as _;
use rvos_fs_types::{
    BLOCK_SIZE, BITS_PER_BLOCK, BlockNo, DIR_SIZE, Dinode, DirEntry, IndirectBlock, InodeNo,
    INODES_PER_BLOCK, NUM_DIRECT, NUM_INDIRECT, SuperBlock, T_DIR, T_FILE,
};
use rvos_kernel_params::{FS_BMAP_BLOCKS, FS_INODE_BLOCKS, FS_LOG_BLOCKS, FS_TOTAL_BLOCKS};

const _: () = const {
    assert!(BLOCK_SIZE % size_of::<DirEntry>() == 0);
    assert!(FS_TOTAL_BLOCKS / BITS_PER_BLOCK < FS_BMAP_BLOCKS + 1);
};

fn main() -> io::Result<()> {
    let args = env::args().collect::<Vec<String>>();
    if args.len() < 2 {
        eprintln!("Usage: {} fs.img [files...]", args[0]);
        process::exit(1);
    }

    let image_file = &args[1];
    let contents = &args[2..];

    let mut fs = FileSystem::create(Path::new(image_file))?;

    for name in contents {
        let short_name = name
            .rsplit('/')
            .next()
            .unwrap()
            .trim_start_matches('_')
            .to_owned();

        let mut data = vec![];
        File::open(name)?.read_to_end(&mut data)?;
        let ino = fs.create_file(&data)?;
        fs.add_root_entry(&short_name, ino)?;
    }

    fs.finish()?;

    eprintln!(
        "mkfs: {} blocks total ({} meta, {} data), {} inodes",
        fs.sb.size,
        fs.sb.size - fs.sb.nblocks,
        fs.sb.nblocks,
        fs.sb.ninodes,
    );

    Ok(())
}

struct FileSystem {
    img: File,
    sb: SuperBlock,
    next_inode: u32,
    next_block: u32,
}

impl FileSystem {
    /// Creates an empty image: zeroed blocks, superblock, root
    /// directory with `.` and `..`.
    fn create(path: &Path) -> io::Result<Self> {
        let total = FS_TOTAL_BLOCKS as u32;
        let nlog = FS_LOG_BLOCKS as u32;
        let ninode_blocks = FS_INODE_BLOCKS as u32;
        let nbmap = FS_BMAP_BLOCKS as u32;
        let nmeta = 2 + nlog + ninode_blocks + nbmap;

        let sb = SuperBlock {
            magic: SuperBlock::FS_MAGIC,
            size: total,
            nblocks: total - nmeta,
            ninodes: ninode_blocks * INODES_PER_BLOCK as u32,
            nlog,
            logstart: 2,
            inodestart: 2 + nlog,
            bmapstart: 2 + nlog + ninode_blocks,
        };

        let img = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut fs = Self {
            img,
            sb,
            next_inode: 1,
            next_block: nmeta,
        };

        // zero every block first.
        let zero = [0u8; BLOCK_SIZE];
        for bn in 0..total {
            fs.write_block(BlockNo::new(bn), &zero)?;
        }

        let mut sb_block = [0u8; BLOCK_SIZE];
        sb_block[..size_of::<SuperBlock>()].copy_from_slice(fs.sb.as_bytes());
        fs.write_block(SuperBlock::SUPER_BLOCK_NO, &sb_block)?;

        // the root directory.
        let root = fs.alloc_inode(T_DIR)?;
        assert_eq!(root, InodeNo::ROOT);
        fs.append_dirent(root, ".", root)?;
        fs.append_dirent(root, "..", root)?;

        Ok(fs)
    }

    /// Writes the free bitmap covering everything allocated so far,
    /// and pads the root directory size to a block multiple.
    fn finish(&mut self) -> io::Result<()> {
        // round the root directory up to whole blocks, the way the
        // kernel's directory scans expect.
        let mut root = self.read_inode(InodeNo::ROOT)?;
        root.size = root.size.next_multiple_of(BLOCK_SIZE as u32);
        self.write_inode(InodeNo::ROOT, &root)?;

        let mut bmap = [0u8; BLOCK_SIZE];
        for bn in 0..self.next_block as usize {
            bmap[bn / 8] |= 1 << (bn % 8);
        }
        self.write_block(BlockNo::new(self.sb.bmapstart), &bmap)
    }

    fn write_block(&mut self, bn: BlockNo, data: &[u8; BLOCK_SIZE]) -> io::Result<()> {
        self.img
            .seek(SeekFrom::Start(bn.as_index() as u64 * BLOCK_SIZE as u64))?;
        self.img.write_all(data)
    }

    fn read_block(&mut self, bn: BlockNo) -> io::Result<[u8; BLOCK_SIZE]> {
        let mut data = [0u8; BLOCK_SIZE];
        self.img
            .seek(SeekFrom::Start(bn.as_index() as u64 * BLOCK_SIZE as u64))?;
        self.img.read_exact(&mut data)?;
        Ok(data)
    }

    fn alloc_block(&mut self) -> io::Result<BlockNo> {
        if self.next_block >= self.sb.size {
            return Err(io::Error::other("image out of data blocks"));
        }
        let bn = BlockNo::new(self.next_block);
        self.next_block += 1;
        Ok(bn)
    }

    fn alloc_inode(&mut self, ty: i16) -> io::Result<InodeNo> {
        if self.next_inode >= self.sb.ninodes {
            return Err(io::Error::other("image out of inodes"));
        }
        let ino = InodeNo::new(self.next_inode);
        self.next_inode += 1;

        let mut dinode = Dinode::zeroed();
        dinode.ty = ty;
        dinode.nlink = 1;
        self.write_inode(ino, &dinode)?;
        Ok(ino)
    }

    fn read_inode(&mut self, ino: InodeNo) -> io::Result<Dinode> {
        let block = self.read_block(self.sb.inode_block(ino))?;
        let offset = SuperBlock::inode_offset(ino);
        Ok(dataview::DataView::from(&block[..]).get::<Dinode>(offset).clone())
    }

    fn write_inode(&mut self, ino: InodeNo, dinode: &Dinode) -> io::Result<()> {
        let bn = self.sb.inode_block(ino);
        let mut block = self.read_block(bn)?;
        let offset = SuperBlock::inode_offset(ino);
        block[offset..][..size_of::<Dinode>()].copy_from_slice(dinode.as_bytes());
        self.write_block(bn, &block)
    }

    /// Maps content block `ibn` of `dinode`, allocating data and
    /// indirect blocks as needed.
    fn bmap(&mut self, dinode: &mut Dinode, ibn: usize) -> io::Result<BlockNo> {
        if ibn < NUM_DIRECT {
            if dinode.addrs[ibn] == 0 {
                dinode.addrs[ibn] = self.alloc_block()?.value();
            }
            return Ok(BlockNo::new(dinode.addrs[ibn]));
        }

        let ibn = ibn - NUM_DIRECT;
        if ibn < NUM_INDIRECT {
            if dinode.addrs[Dinode::SINGLE] == 0 {
                dinode.addrs[Dinode::SINGLE] = self.alloc_block()?.value();
            }
            return self.indirect_map(BlockNo::new(dinode.addrs[Dinode::SINGLE]), ibn);
        }

        let ibn = ibn - NUM_INDIRECT;
        if dinode.addrs[Dinode::DOUBLE] == 0 {
            dinode.addrs[Dinode::DOUBLE] = self.alloc_block()?.value();
        }
        let level1 = self.indirect_map(
            BlockNo::new(dinode.addrs[Dinode::DOUBLE]),
            ibn / NUM_INDIRECT,
        )?;
        self.indirect_map(level1, ibn % NUM_INDIRECT)
    }

    /// Looks entry `i` up in the indirect block `table`, allocating
    /// the target on first touch.
    fn indirect_map(&mut self, table: BlockNo, i: usize) -> io::Result<BlockNo> {
        let mut block = self.read_block(table)?;
        let view = dataview::DataView::from_mut(&mut block[..]).get_mut::<IndirectBlock>(0);
        if let Some(bn) = view.get(i) {
            return Ok(bn);
        }
        let bn = self.alloc_block()?;
        view.set(i, Some(bn));
        self.write_block(table, &block)?;
        Ok(bn)
    }

    /// Appends `data` to inode `ino`'s content.
    fn append(&mut self, ino: InodeNo, data: &[u8]) -> io::Result<()> {
        let mut dinode = self.read_inode(ino)?;
        let mut off = dinode.size as usize;

        let mut remaining = data;
        while !remaining.is_empty() {
            let bn = self.bmap(&mut dinode, off / BLOCK_SIZE)?;
            let mut block = self.read_block(bn)?;
            let in_block = off % BLOCK_SIZE;
            let n = usize::min(remaining.len(), BLOCK_SIZE - in_block);
            block[in_block..][..n].copy_from_slice(&remaining[..n]);
            self.write_block(bn, &block)?;
            off += n;
            remaining = &remaining[n..];
        }

        dinode.size = off as u32;
        self.write_inode(ino, &dinode)
    }

    /// Creates a regular file holding `data`.
    fn create_file(&mut self, data: &[u8]) -> io::Result<InodeNo> {
        let ino = self.alloc_inode(T_FILE)?;
        self.append(ino, data)?;
        Ok(ino)
    }

    /// Appends a directory entry for (`name`, `ino`) to the root
    /// directory.
    fn add_root_entry(&mut self, name: &str, ino: InodeNo) -> io::Result<()> {
        if name.len() > DIR_SIZE {
            return Err(io::Error::other(format!("file name too long: {name}")));
        }
        self.append_dirent(InodeNo::ROOT, name, ino)
    }

    fn append_dirent(&mut self, dir: InodeNo, name: &str, ino: InodeNo) -> io::Result<()> {
        let mut de = DirEntry::zeroed();
        de.set_name(name.as_bytes());
        de.set_inum(Some(ino));
        self.append(dir, de.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_image(name: &str) -> std::path::PathBuf {
        let mut path = env::temp_dir();
        path.push(format!("rvos-mkfs-test-{name}-{}", process::id()));
        path
    }

    fn read_dinode(fs: &mut FileSystem, ino: InodeNo) -> Dinode {
        fs.read_inode(ino).unwrap()
    }

    #[test]
    fn empty_image_geometry() {
        let path = temp_image("geometry");
        let mut fs = FileSystem::create(&path).unwrap();
        fs.finish().unwrap();

        let sb_block = fs.read_block(SuperBlock::SUPER_BLOCK_NO).unwrap();
        let sb = dataview::DataView::from(&sb_block[..]).get::<SuperBlock>(0).clone();
        assert_eq!(sb.magic, SuperBlock::FS_MAGIC);
        assert_eq!(sb.size, FS_TOTAL_BLOCKS as u32);
        assert_eq!(sb.logstart, 2);
        assert_eq!(sb.inodestart, 2 + FS_LOG_BLOCKS as u32);
        assert_eq!(
            sb.bmapstart,
            2 + (FS_LOG_BLOCKS + FS_INODE_BLOCKS) as u32
        );
        assert_eq!(
            sb.nblocks,
            (FS_TOTAL_BLOCKS - 2 - FS_LOG_BLOCKS - FS_INODE_BLOCKS - FS_BMAP_BLOCKS) as u32
        );

        // the log header block reports an empty log.
        let log_header = fs.read_block(BlockNo::new(sb.logstart)).unwrap();
        assert!(log_header.iter().all(|&b| b == 0));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn root_directory_entries() {
        let path = temp_image("root");
        let mut fs = FileSystem::create(&path).unwrap();
        fs.finish().unwrap();

        let root = read_dinode(&mut fs, InodeNo::ROOT);
        assert_eq!(root.ty, T_DIR);
        assert_eq!(root.size as usize % size_of::<DirEntry>(), 0);
        assert_eq!(root.size as usize, BLOCK_SIZE); // padded to a block

        let data = fs.read_block(BlockNo::new(root.addrs[0])).unwrap();
        let view = dataview::DataView::from(&data[..]);
        let dot = view.get::<DirEntry>(0).clone();
        let dotdot = view.get::<DirEntry>(size_of::<DirEntry>()).clone();
        assert_eq!(dot.name(), b".");
        assert_eq!(dot.inum(), Some(InodeNo::ROOT));
        assert_eq!(dotdot.name(), b"..");
        assert_eq!(dotdot.inum(), Some(InodeNo::ROOT));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn file_content_round_trip() {
        let path = temp_image("content");
        let mut fs = FileSystem::create(&path).unwrap();

        // spans the direct blocks into the single-indirect range.
        let payload: Vec<u8> = (0..(NUM_DIRECT + 3) * BLOCK_SIZE + 17)
            .map(|i| (i % 251) as u8)
            .collect();
        let ino = fs.create_file(&payload).unwrap();
        fs.add_root_entry("big", ino).unwrap();
        fs.finish().unwrap();

        let mut dinode = read_dinode(&mut fs, ino);
        assert_eq!(dinode.ty, T_FILE);
        assert_eq!(dinode.size as usize, payload.len());
        assert_ne!(dinode.addrs[Dinode::SINGLE], 0);
        assert_eq!(dinode.addrs[Dinode::DOUBLE], 0);

        // read it back through the same mapping the kernel would use.
        let mut read_back = Vec::new();
        for ibn in 0..payload.len().div_ceil(BLOCK_SIZE) {
            let bn = fs.bmap(&mut dinode, ibn).unwrap();
            read_back.extend_from_slice(&fs.read_block(bn).unwrap());
        }
        read_back.truncate(payload.len());
        assert_eq!(read_back, payload);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn bitmap_covers_allocated_blocks() {
        let path = temp_image("bitmap");
        let mut fs = FileSystem::create(&path).unwrap();
        let ino = fs.create_file(&[0xabu8; 3 * BLOCK_SIZE]).unwrap();
        fs.add_root_entry("f", ino).unwrap();
        fs.finish().unwrap();

        let allocated = fs.next_block as usize;
        let bmap = fs.read_block(BlockNo::new(fs.sb.bmapstart)).unwrap();
        for bn in 0..FS_TOTAL_BLOCKS {
            let bit = bmap[bn / 8] >> (bn % 8) & 1 != 0;
            assert_eq!(bit, bn < allocated, "bitmap bit mismatch at block {bn}");
        }

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn double_indirect_reach() {
        let path = temp_image("double");
        let mut fs = FileSystem::create(&path).unwrap();

        // force one block past the single-indirect range.
        let mut dinode = Dinode::zeroed();
        let bn = fs.bmap(&mut dinode, NUM_DIRECT + NUM_INDIRECT).unwrap();
        assert_ne!(dinode.addrs[Dinode::DOUBLE], 0);

        // the same index maps to the same block.
        let again = fs.bmap(&mut dinode, NUM_DIRECT + NUM_INDIRECT).unwrap();
        assert_eq!(bn, again);

        std::fs::remove_file(&path).unwrap();
    }
}
