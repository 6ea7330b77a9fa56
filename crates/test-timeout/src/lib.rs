use proc_macro::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Attribute, Ident, ItemFn, LitInt, Token};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// One argument of a timeout attribute: the budget in seconds, `paused` or `multi_thread`.
enum TimeoutArg {
    Secs(LitInt),
    Paused(Ident),
    MultiThread(Ident),
}

impl Parse for TimeoutArg {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let lookahead = input.lookahead1();
        if lookahead.peek(LitInt) {
            return Ok(TimeoutArg::Secs(input.parse()?));
        }
        if lookahead.peek(Ident) {
            let ident: Ident = input.parse()?;
            if ident == "paused" {
                return Ok(TimeoutArg::Paused(ident));
            }
            if ident == "multi_thread" {
                return Ok(TimeoutArg::MultiThread(ident));
            }
            return Err(syn::Error::new_spanned(ident, "expected `paused` or `multi_thread`"));
        }
        Err(lookahead.error())
    }
}

struct TimeoutOptions {
    secs: u64,
    paused: bool,
    multi_thread: bool,
}

fn parse_options(attr: TokenStream) -> syn::Result<TimeoutOptions> {
    let mut options = TimeoutOptions {
        secs: DEFAULT_TIMEOUT_SECS,
        paused: false,
        multi_thread: false,
    };
    if attr.is_empty() {
        return Ok(options);
    }
    let args = syn::parse::Parser::parse(
        Punctuated::<TimeoutArg, Token![,]>::parse_terminated,
        attr,
    )?;
    for arg in args {
        match arg {
            TimeoutArg::Secs(lit) => {
                let secs: u64 = lit.base10_parse()?;
                if secs == 0 {
                    return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
                }
                options.secs = secs;
            }
            TimeoutArg::Paused(_) => options.paused = true,
            TimeoutArg::MultiThread(ident) => {
                if options.paused {
                    return Err(syn::Error::new_spanned(
                        ident,
                        "a paused clock needs the current-thread runtime",
                    ));
                }
                options.multi_thread = true;
            }
        }
    }
    if options.paused && options.multi_thread {
        return Err(syn::Error::new(
            proc_macro2::Span::call_site(),
            "a paused clock needs the current-thread runtime",
        ));
    }
    Ok(options)
}

/// Runs an async test on a current-thread Tokio runtime under a wall-clock budget.
///
/// `#[tokio_timeout_test]`, `#[tokio_timeout_test(10)]` or `#[tokio_timeout_test(10, paused)]`.
/// With `paused` the runtime starts with a frozen clock that auto-advances when idle.
/// `multi_thread` runs the test on a four-worker runtime instead.
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let options = match parse_options(attr) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }

    sig.asyncness = None;

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_tokio_test_attribute(attr))
        .collect();

    let timeout = options.secs;
    let start_paused = options.paused;
    let builder = if options.multi_thread {
        quote! {
            let mut builder = tokio::runtime::Builder::new_multi_thread();
            builder.worker_threads(4);
        }
    } else {
        quote! {
            let mut builder = tokio::runtime::Builder::new_current_thread();
        }
    };

    TokenStream::from(quote! {
        #[test]
        #(#filtered_attrs)*
        #vis #sig {
            let timeout_duration = std::time::Duration::from_secs(#timeout);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    #builder
                    builder.enable_all();
                    if #start_paused {
                        builder.start_paused(true);
                    }
                    let runtime = builder.build().expect("failed to build Tokio runtime");
                    runtime.block_on(async {
                        tokio::time::timeout(timeout_duration, async move #block)
                            .await
                            .expect("test timed out");
                    });
                }));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(timeout_duration + std::time::Duration::from_secs(1)) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    })
}

fn is_tokio_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!(
        (segments.next(), segments.next(), segments.next()),
        (Some(first), Some(second), None)
            if first.ident == "tokio" && second.ident == "test"
    )
}

/// Runs a synchronous test on its own thread and fails it once the budget is spent.
#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let options = match parse_options(attr) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };
    if options.paused {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "`paused` only applies to tokio_timeout_test",
        )
        .to_compile_error()
        .into();
    }

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "timeout attribute expects a synchronous test function",
        )
        .to_compile_error()
        .into();
    }

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_attribute(attr))
        .collect();

    let timeout = options.secs;

    TokenStream::from(quote! {
        #[test]
        #(#filtered_attrs)*
        #vis #sig {
            let timeout_duration = std::time::Duration::from_secs(#timeout);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| #block ));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(timeout_duration) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    })
}

fn is_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!((segments.next(), segments.next()), (Some(first), None) if first.ident == "test")
}
