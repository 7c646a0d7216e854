pub mod footnotes;
pub mod rewriting; // External rewriting capability (Ollama)
pub mod storage; // Annotation-safe chunking
