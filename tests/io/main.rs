// IO module tests
mod compression;
mod output;
mod select;
