//! 内置库模块

/// 库模块名
pub const LISTS: &str = "lists";

pub(crate) const LISTS_SOURCE: &str = r#"
member(X, [X|_]).
member(X, [_|T]) :- member(X, T).

append([], L, L).
append([H|T], L, [H|R]) :- append(T, L, R).

length(L, N) :- '$length'(L, 0, N).
'$length'([], N, N).
'$length'([_|T], N0, N) :- N1 is N0 + 1, '$length'(T, N1, N).

reverse(L, R) :- '$reverse'(L, [], R).
'$reverse'([], A, A).
'$reverse'([H|T], A, R) :- '$reverse'(T, [H|A], R).

nth0(I, L, E) :- '$nth'(L, 0, I, E).
nth1(I, L, E) :- '$nth'(L, 1, I, E).
'$nth'([H|_], B, B, H).
'$nth'([_|T], B0, I, E) :- B1 is B0 + 1, '$nth'(T, B1, I, E).

last([X], X) :- !.
last([_|T], X) :- last(T, X).

sum_list(L, S) :- '$sum'(L, 0, S).
'$sum'([], S, S).
'$sum'([H|T], S0, S) :- S1 is S0 + H, '$sum'(T, S1, S).
"#;
